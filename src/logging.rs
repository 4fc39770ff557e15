use {
    log::{Level, LevelFilter},
    std::{
        env,
        fs::File,
        io::Write,
        mem::ManuallyDrop,
        os::{fd::FromRawFd, linux::fs::MetadataExt},
    },
};

/// The process a log line originates from.
///
/// Parent and helper usually write into the same journal, so every line carries the role.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Parent,
    Helper,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Helper => "helper",
        }
    }
}

pub fn init(role: Role) {
    let role = role.as_str();
    let mut builder = env_logger::builder();
    if stderr_is_journal() {
        builder.format(move |f, r| {
            write!(f, "<{}>{role}: ", syslog_priority(r.level()))?;
            if let Some(path) = r.module_path() {
                write!(f, "{path}: ")?;
            }
            writeln!(f, "{}", r.args())
        });
    } else {
        builder.format(move |f, r| {
            let style = f.default_level_style(r.level());
            writeln!(
                f,
                "[{} {style}{:<5}{style:#} {role} {}] {}",
                f.timestamp(),
                r.level(),
                r.module_path().unwrap_or_default(),
                r.args(),
            )
        });
    }
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn syslog_priority(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

fn stderr_is_journal() -> bool {
    let Ok(journal_stream) = env::var("JOURNAL_STREAM") else {
        return false;
    };
    let Some((dev, ino)) = parse_journal_stream(&journal_stream) else {
        return false;
    };
    let stderr = unsafe { ManuallyDrop::new(File::from_raw_fd(2)) };
    let Ok(metadata) = stderr.metadata() else {
        return false;
    };
    metadata.st_dev() == dev && metadata.st_ino() == ino
}

fn parse_journal_stream(s: &str) -> Option<(u64, u64)> {
    let (dev, ino) = s.split_once(':')?;
    Some((dev.parse().ok()?, ino.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_stream_is_dev_and_inode() {
        assert_eq!(parse_journal_stream("8:12345"), Some((8, 12345)));
        assert_eq!(parse_journal_stream("8"), None);
        assert_eq!(parse_journal_stream("x:1"), None);
        assert_eq!(parse_journal_stream("1:"), None);
    }

    #[test]
    fn priorities_follow_syslog() {
        assert_eq!(syslog_priority(Level::Error), 3);
        assert_eq!(syslog_priority(Level::Warn), 4);
        assert_eq!(syslog_priority(Level::Info), 6);
        assert_eq!(syslog_priority(Level::Trace), 7);
    }
}
