use anyhow::{Result, anyhow};
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Formatted log lines go to stdout and to every tail subscriber.
#[derive(Clone)]
pub struct LogMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for LogMakeWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub struct LogWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // no tail attached
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

pub fn parse_level(level: &str) -> Result<Level> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| anyhow!("unknown log level '{}'", level))
}

/// Installs the global subscriber and returns the sender feeding the log tail.
pub fn init(level: &str, suppress_stdout: bool) -> Result<broadcast::Sender<String>> {
    let (sender, _) = broadcast::channel(512);
    let make_writer = LogMakeWriter {
        sender: sender.clone(),
        suppress_stdout,
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(parse_level(level)?)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("logging already initialised: {}", e))?;
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_forwards_lines_to_subscribers() {
        let (sender, mut rx) = broadcast::channel(4);
        let make = LogMakeWriter {
            sender,
            suppress_stdout: true,
        };
        let mut writer = make.make_writer();
        writer.write_all(b"hello\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello\n");
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" warn ").unwrap(), Level::WARN);
        assert!(parse_level("chatty").is_err());
    }
}
