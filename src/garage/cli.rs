//! Garage command-line contract.

use std::path::PathBuf;

use crate::config::BucketPermissions;
use crate::process::CommandSpec;

/// Builds the garage invocations used during bootstrap and handoff
#[derive(Debug, Clone)]
pub struct GarageCli {
    binary: PathBuf,
}

impl GarageCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn cmd(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    pub fn server(&self) -> CommandSpec {
        self.cmd().arg("server")
    }

    pub fn status(&self) -> CommandSpec {
        self.cmd().arg("status")
    }

    pub fn node_id(&self) -> CommandSpec {
        self.cmd().args(["node", "id"])
    }

    pub fn layout_assign(&self, zone: &str, capacity: &str, node_id: &str) -> CommandSpec {
        self.cmd()
            .args(["layout", "assign", "-z", zone, "-c", capacity, node_id])
    }

    pub fn layout_apply(&self, version: &str) -> CommandSpec {
        self.cmd().args(["layout", "apply", "--version", version])
    }

    pub fn layout_show(&self) -> CommandSpec {
        self.cmd().args(["layout", "show"])
    }

    pub fn key_list(&self) -> CommandSpec {
        self.cmd().args(["key", "list"])
    }

    pub fn key_import(&self, access_key: &str, secret_key: &str, yes: bool) -> CommandSpec {
        let mut cmd = self.cmd().args(["key", "import"]);
        if yes {
            cmd = cmd.arg("--yes");
        }
        cmd.arg(access_key).secret_arg(secret_key)
    }

    pub fn bucket_list(&self) -> CommandSpec {
        self.cmd().args(["bucket", "list"])
    }

    pub fn bucket_create(&self, name: &str) -> CommandSpec {
        self.cmd().args(["bucket", "create", name])
    }

    pub fn bucket_allow(&self, name: &str, access_key: &str, perms: BucketPermissions) -> CommandSpec {
        let mut cmd = self.cmd().args(["bucket", "allow", name, "--key", access_key]);
        if perms.read {
            cmd = cmd.arg("--read");
        }
        if perms.write {
            cmd = cmd.arg("--write");
        }
        if perms.owner {
            cmd = cmd.arg("--owner");
        }
        cmd
    }

    /// `garage <subcommand...> --help`
    pub fn help(&self, subcommand: &[&str]) -> CommandSpec {
        self.cmd().args(subcommand.iter().copied()).arg("--help")
    }
}
