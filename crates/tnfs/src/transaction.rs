//! The request/response cycle every TNFS command goes through.
//!
//! A request is transmitted with the next sequence number and the engine waits
//! for a datagram echoing that sequence number and opcode. Datagrams that do
//! not match (late answers to earlier attempts, duplicates) are discarded and
//! the wait goes on until the same deadline. An attempt with no acceptable
//! answer is retried after the server's minimum retry interval, with a fresh
//! sequence number so a late answer to the earlier attempt is not mistaken
//! for the new one.

use {
    crate::{
        error::Error,
        fcall::*,
        serialize,
        session::MountInfo,
        transport::Transport,
        utils::Result,
    },
    log::{debug, error, warn},
    std::time::Duration,
    tokio::time::{self, Instant},
};

/// Run one request to completion.
///
/// Returns the first acceptable reply whatever its result code; protocol
/// failures are left for the caller to interpret. Exhausting every attempt
/// yields [`Error::NoResponse`], after which nothing can be said about whether
/// the server acted on the request.
pub async fn execute<T>(transport: &mut T, mount: &mut MountInfo, request: &Request) -> Result<Reply>
where
    T: Transport + ?Sized,
{
    let opcode = Opcode::from(request);
    if opcode != Opcode::Mount && !mount.is_mounted() {
        return Err(Error::NotMounted);
    }

    let payload = serialize::encode_request(request)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::NameTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let session = match opcode {
        Opcode::Mount => NO_SESSION,
        _ => mount.session(),
    };

    let attempts = mount.max_retries();
    for attempt in 1..=attempts {
        let header = Header {
            session,
            sequence: mount.next_sequence(),
            opcode,
        };
        let packet = Packet {
            header,
            payload: payload.clone(),
        };
        debug!("\t→ {}", packet);

        match transport.send(packet).await {
            Ok(()) => {
                if let Some(reply) = await_reply(transport, &header, mount.timeout()).await {
                    return Ok(reply);
                }
            }
            Err(e) => warn!("{}: send failed: {}", header, e),
        }

        if attempt < attempts {
            let delay = mount.min_retry();
            warn!("{}: attempt {}/{} failed, retrying in {:?}", header, attempt, attempts, delay);
            time::sleep(delay).await;
        }
    }

    error!("{}: no response after {} attempts", opcode, attempts);
    Err(Error::NoResponse { attempts })
}

async fn await_reply<T>(transport: &mut T, sent: &Header, timeout: Duration) -> Option<Reply>
where
    T: Transport + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        let packet = match time::timeout_at(deadline, transport.recv()).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(e)) => {
                warn!("{}: receive failed: {}", sent, e);
                return None;
            }
            Err(_) => {
                warn!("{}: no answer within {:?}", sent, timeout);
                return None;
            }
        };
        debug!("\t← {}", packet);

        if !answers(sent, &packet.header) {
            warn!("{}: discarding unexpected response {}", sent, packet.header);
            continue;
        }

        match serialize::read_reply(packet) {
            Ok(reply) => return Some(reply),
            Err(e) => warn!("{}: discarding response: {}", sent, e),
        }
    }
}

/// Whether `received` is the answer to `sent`.
///
/// MOUNT answers carry the newly assigned session, every other answer must
/// echo the session the request was sent with.
fn answers(sent: &Header, received: &Header) -> bool {
    received.sequence == sent.sequence
        && received.opcode == sent.opcode
        && (sent.opcode == Opcode::Mount || received.session == sent.session)
}
