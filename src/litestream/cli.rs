//! Litestream command-line contract.

use std::path::{Path, PathBuf};

use crate::process::CommandSpec;

/// Builds the litestream invocations used by the supervisor
#[derive(Debug, Clone)]
pub struct LitestreamCli {
    binary: PathBuf,
}

impl LitestreamCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn cmd(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    /// Restore `db` from its replica, doing nothing when no replica exists
    pub fn restore(&self, config: &Path, db: &Path) -> CommandSpec {
        self.cmd().args([
            "restore".to_string(),
            "-if-replica-exists".to_string(),
            "-config".to_string(),
            config.display().to_string(),
            "-o".to_string(),
            db.display().to_string(),
        ])
    }

    /// Continuous replication, optionally supervising a child command
    pub fn replicate(&self, config: &Path, exec: Option<&str>) -> CommandSpec {
        let cmd = self
            .cmd()
            .args(["replicate", "-config"])
            .arg(config.display().to_string());
        match exec {
            Some(child) => cmd.args(["-exec", child]),
            None => cmd,
        }
    }

    pub fn db_list(&self, config: &Path) -> CommandSpec {
        self.cmd()
            .args(["db", "list", "-config"])
            .arg(config.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        let cli = LitestreamCli::new("/litestream");
        let config = Path::new("/tmp/litestream.yml");

        assert_eq!(
            cli.restore(config, Path::new("/pb_data/data.db")).to_string(),
            "litestream restore -if-replica-exists -config /tmp/litestream.yml -o /pb_data/data.db"
        );
        assert_eq!(
            cli.replicate(config, None).to_string(),
            "litestream replicate -config /tmp/litestream.yml"
        );
        assert_eq!(cli.db_list(config).to_string(), "litestream db list -config /tmp/litestream.yml");
    }

    #[test]
    fn test_replicate_exec_is_one_argument() {
        let cli = LitestreamCli::new("/litestream");
        let cmd = cli.replicate(
            Path::new("/tmp/litestream.yml"),
            Some("/pocketbase serve --http 0.0.0.0:8090"),
        );
        assert_eq!(cmd.get_args().len(), 5);
        assert_eq!(cmd.get_args()[4], "/pocketbase serve --http 0.0.0.0:8090");
    }
}
