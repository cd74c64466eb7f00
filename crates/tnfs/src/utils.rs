use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Make `path` absolute on the server by prepending the `/` separator if missing.
///
/// TNFS always uses `/` regardless of the server's native convention.
/// Paths with an embedded NUL cannot be represented on the wire.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.contains('\0') {
        return res!(io_err!(InvalidInput, "path contains a NUL byte"));
    }

    if path.starts_with('/') {
        Ok(path.to_owned())
    } else {
        Ok(format!("/{}", path))
    }
}

/// Split `scheme://host[:port]/path` into its parts.
///
/// The path keeps its leading `/` and defaults to `/` when absent.
pub fn parse_url(url: &str) -> Option<(&str, &str, Option<u16>, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port.parse().ok()?)),
        None => (authority, None),
    };

    if scheme.is_empty() || host.is_empty() {
        return None;
    }

    Some((scheme, host, port, path))
}
