use crate::error::{LisoError, Result};
use std::path::PathBuf;

pub const USAGE: &str =
    "usage: liso <HTTP port> <HTTPS port> <log file> <lock file> <www folder> \
     <CGI script path> <privatekey file> <certificate file>\n   or: liso \
     <HTTP port> <log file> <lock file> <www folder> <CGI script path>";

/// The eight (or five) positional command-line arguments, resolved and
/// validated once at startup. Everything the event loop needs to run is
/// reachable from here; there are no other process-wide globals besides the
/// signal flag and the CGI reap sweep.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub tls: Option<TlsConfig>,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub www_folder: PathBuf,
    pub cgi_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub https_port: u16,
    pub private_key_file: PathBuf,
    pub certificate_file: PathBuf,
}

impl Config {
    /// Parses the arguments following argv[0]. Arity 8 enables the HTTPS
    /// listener; arity 5 is the plaintext-only variant.
    pub fn parse_args(args: &[String]) -> Result<Config> {
        let config = match args.len() {
            8 => Config {
                http_port: parse_port(&args[0])?,
                tls: Some(TlsConfig {
                    https_port: parse_port(&args[1])?,
                    private_key_file: PathBuf::from(&args[6]),
                    certificate_file: PathBuf::from(&args[7]),
                }),
                log_file: PathBuf::from(&args[2]),
                lock_file: PathBuf::from(&args[3]),
                www_folder: PathBuf::from(&args[4]),
                cgi_path: PathBuf::from(&args[5]),
            },
            5 => Config {
                http_port: parse_port(&args[0])?,
                tls: None,
                log_file: PathBuf::from(&args[1]),
                lock_file: PathBuf::from(&args[2]),
                www_folder: PathBuf::from(&args[3]),
                cgi_path: PathBuf::from(&args[4]),
            },
            _ => return Err(LisoError::from(format!("wrong number of arguments\n{USAGE}"))),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks filesystem preconditions the core assumes hold before the
    /// event loop starts: document root is a directory, CGI script exists,
    /// TLS key/cert exist when configured. Collects every problem instead of
    /// stopping at the first, so a bad invocation gets one complete report.
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !self.www_folder.is_dir() {
            problems.push(format!(
                "document root '{}' is not a directory",
                self.www_folder.display()
            ));
        }
        if !self.cgi_path.is_file() {
            problems.push(format!(
                "CGI script '{}' does not exist",
                self.cgi_path.display()
            ));
        }
        if let Some(tls) = &self.tls {
            if !tls.private_key_file.is_file() {
                problems.push(format!(
                    "private key file '{}' does not exist",
                    tls.private_key_file.display()
                ));
            }
            if !tls.certificate_file.is_file() {
                problems.push(format!(
                    "certificate file '{}' does not exist",
                    tls.certificate_file.display()
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(LisoError::from(problems.join("; ")))
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| LisoError::from(format!("'{s}' is not a valid port")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_arity() {
        let args: Vec<String> = vec!["8080".into(), "log".into()];
        assert!(Config::parse_args(&args).is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        let args: Vec<String> = vec![
            "not-a-port".into(),
            "log".into(),
            "lock".into(),
            ".".into(),
            "/bin/ls".into(),
        ];
        assert!(Config::parse_args(&args).is_err());
    }

    #[test]
    fn arity_five_has_no_tls() {
        let args: Vec<String> = vec![
            "8080".into(),
            "log".into(),
            "lock".into(),
            ".".into(),
            "/bin/ls".into(),
        ];
        let config = Config::parse_args(&args).unwrap();
        assert_eq!(config.http_port, 8080);
        assert!(config.tls.is_none());
    }
}
