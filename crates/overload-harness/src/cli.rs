use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// MQTT broker load harness.
#[derive(Parser, Debug, Clone)]
#[command(name = "overload-harness", version, about = "MQTT broker load generator")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(
        long,
        short,
        default_value = "config/overload.yaml",
        env = "OVERLOAD_CONFIG"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publish JSON records on rotating topics from every client
    Publish,
    /// Subscribe through a shared group and log each delivery
    Subscribe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_and_default_config() {
        let cli = Cli::try_parse_from(["overload-harness", "publish"]).unwrap();
        assert_eq!(cli.role, Role::Publish);
        assert_eq!(cli.config, PathBuf::from("config/overload.yaml"));
    }

    #[test]
    fn explicit_config_path() {
        let cli =
            Cli::try_parse_from(["overload-harness", "--config", "/tmp/x.yaml", "subscribe"])
                .unwrap();
        assert_eq!(cli.role, Role::Subscribe);
        assert_eq!(cli.config, PathBuf::from("/tmp/x.yaml"));
    }

    #[test]
    fn role_is_required() {
        assert!(Cli::try_parse_from(["overload-harness"]).is_err());
    }
}
