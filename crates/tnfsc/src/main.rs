use {
    clap::{Parser, Subcommand},
    std::{path::PathBuf, time::Duration},
    tnfs::{
        session::{MountOptions, Session},
        transport::Transport,
        *,
    },
    tokio::{fs, io::AsyncWriteExt},
};

#[derive(Debug, Subcommand)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Show type and size of every entry
        #[arg(short, long)]
        long: bool,
    },
    /// Show the attributes of a file or directory
    Stat { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    /// Download a file
    Get {
        remote: String,
        /// Defaults to the remote file name
        local: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        local: PathBuf,
        /// Defaults to the local file name in the mount root
        remote: Option<String>,
    },
    /// Delete a file
    Rm { path: String },
    /// Rename a file
    Mv { from: String, to: String },
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TNFS server host name or address
    host: String,

    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value_t = TNFS_PORT)]
    port: u16,

    /// Directory to mount on the server
    #[arg(long, default_value = "/")]
    mount: String,

    #[arg(long, default_value = "")]
    user: String,

    #[arg(long, default_value = "")]
    password: String,

    /// How long each attempt waits for an answer
    #[arg(long, default_value_t = 6000)]
    timeout_ms: u64,

    /// Transmissions per request before giving up
    #[arg(long, default_value_t = 5)]
    retries: u32,
}

impl Cli {
    fn mount_options(&self) -> MountOptions {
        MountOptions {
            port: self.port,
            path: self.mount.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.retries,
            ..MountOptions::new(self.host.as_str())
        }
    }
}

/// Last component of a `/` separated path
fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Exit status for commands answering with a raw result code
fn report(what: &str, code: ResultCode) -> i32 {
    if code.is_success() {
        0
    } else {
        eprintln!("{}: {}", what, code);
        1
    }
}

async fn get<T: Transport>(session: &mut Session<T>, remote: &str, local: PathBuf) -> Result<i32> {
    let handle = session.open(remote, OpenFlags::RDONLY, FileMode::empty()).await?;
    let mut file = fs::File::create(&local).await?;

    let mut total = 0;
    loop {
        let data = session.read(handle, MAX_IO_SIZE).await?;
        if data.is_empty() {
            break;
        }
        file.write_all(&data).await?;
        total += data.len();
    }
    file.flush().await?;
    session.close(handle).await?;

    println!("{} -> {} ({} bytes)", remote, local.display(), total);
    Ok(0)
}

async fn put<T: Transport>(session: &mut Session<T>, local: PathBuf, remote: &str) -> Result<i32> {
    let content = fs::read(&local).await?;
    let flags = OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC;
    let mode = FileMode::S_IRUSR | FileMode::S_IWUSR | FileMode::S_IRGRP | FileMode::S_IROTH;
    let handle = session.open(remote, flags, mode).await?;

    let mut rest = &content[..];
    while !rest.is_empty() {
        let n = session.write(handle, rest).await?;
        if n == 0 {
            return res!(io_err!(WriteZero, format!("server accepted no data for {}", remote)));
        }
        rest = &rest[n..];
    }
    session.close(handle).await?;

    println!("{} -> {} ({} bytes)", local.display(), remote, content.len());
    Ok(0)
}

async fn run<T: Transport>(session: &mut Session<T>, command: Command) -> Result<i32> {
    match command {
        Command::Ls { path, long } => {
            for name in session.list_dir(&path).await? {
                if name == "." || name == ".." {
                    continue;
                }
                if long {
                    let stat = session.stat(&format!("{}/{}", path.trim_end_matches('/'), name)).await?;
                    let kind = if stat.is_dir() { 'd' } else { '-' };
                    println!("{} {:06o} {:>10} {}", kind, stat.mode.bits(), stat.size, name);
                } else {
                    println!("{}", name);
                }
            }
            Ok(0)
        }
        Command::Stat { path } => {
            let stat = session.stat(&path).await?;
            println!("path:  {}", path);
            println!("type:  {}", if stat.is_dir() { "directory" } else { "file" });
            println!("mode:  {:06o}", stat.mode.bits());
            println!("owner: {}:{}", stat.uid, stat.gid);
            if let (Some(user), Some(group)) = (&stat.uid_name, &stat.gid_name) {
                println!("names: {}:{}", user, group);
            }
            println!("size:  {}", stat.size);
            println!("atime: {}", stat.atime);
            println!("mtime: {}", stat.mtime);
            println!("ctime: {}", stat.ctime);
            Ok(0)
        }
        Command::Mkdir { path } => Ok(report(&path, session.mkdir(&path).await?)),
        Command::Rmdir { path } => Ok(report(&path, session.rmdir(&path).await?)),
        Command::Rm { path } => Ok(report(&path, session.unlink(&path).await?)),
        Command::Mv { from, to } => Ok(report(&from, session.rename(&from, &to).await?)),
        Command::Get { remote, local } => {
            let local = local.unwrap_or_else(|| PathBuf::from(base_name(&remote)));
            get(session, &remote, local).await
        }
        Command::Put { local, remote } => {
            let remote = match remote {
                Some(remote) => remote,
                None => match local.file_name() {
                    Some(name) => format!("/{}", name.to_string_lossy()),
                    None => return res!(io_err!(InvalidInput, "cannot name the remote file")),
                },
            };
            put(session, local, &remote).await
        }
    }
}

async fn tnfsc_main(cli: Cli) -> tnfs::Result<i32> {
    let mut session = Session::connect(cli.mount_options()).await?;
    session.mount().await?;

    let result = run(&mut session, cli.command).await;
    if let Err(e) = session.umount().await {
        eprintln!("Warning: unmount failed: {}", e);
    }
    result
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = tnfsc_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        -1
    });

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn options_from_arguments() {
        let cli = Cli::try_parse_from([
            "tnfsc",
            "--port",
            "16385",
            "--timeout-ms",
            "250",
            "--retries",
            "2",
            "--user",
            "guest",
            "tnfs.example",
            "ls",
            "/games",
        ])
        .unwrap();

        let options = cli.mount_options();
        assert_eq!(options.host, "tnfs.example");
        assert_eq!(options.port, 16385);
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.user, "guest");
        assert_eq!(options.path, "/");
        assert!(matches!(cli.command, Command::Ls { ref path, long: false } if path == "/games"));
    }

    #[test]
    fn defaults_match_the_protocol() {
        let cli = Cli::try_parse_from(["tnfsc", "host", "stat", "/x"]).unwrap();
        let options = cli.mount_options();
        assert_eq!(options.port, TNFS_PORT);
        assert_eq!(options.timeout, Duration::from_millis(6000));
        assert_eq!(options.max_retries, 5);
    }

    #[test]
    fn base_names() {
        assert_eq!(base_name("/games/a.atr"), "a.atr");
        assert_eq!(base_name("games/dir/"), "dir");
        assert_eq!(base_name("file"), "file");
    }

    #[test]
    fn raw_codes_become_exit_status() {
        assert_eq!(report("/a", ResultCode::SUCCESS), 0);
        assert_eq!(report("/a", ResultCode::EXISTS), 1);
    }
}
