//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Build the complete CLI command tree.
pub fn build_cli() -> Command {
    Command::new("isolab")
        .about("Reproduce transaction-isolation anomalies against PostgreSQL")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help("Config file (default: ./isolab.toml when present)")
                .global(true),
        )
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .value_name("URL")
                .help("PostgreSQL URL; overrides the config file and ISOLAB_DATABASE_URL")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("List the built-in scenarios"))
        .subcommand(
            Command::new("run")
                .about("Run scenarios (all of them when none are named)")
                .arg(
                    Arg::new("scenarios")
                        .num_args(0..)
                        .value_name("SCENARIO")
                        .help("Scenario names as shown by `isolab list`"),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Write a default isolab.toml to the config path if none exists"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tree_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_collects_names() {
        let matches = build_cli()
            .try_get_matches_from(["isolab", "run", "deadlock-detected", "read-committed-overfill"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        let names: Vec<_> = sub
            .get_many::<String>("scenarios")
            .unwrap()
            .cloned()
            .collect();
        assert_eq!(names, vec!["deadlock-detected", "read-committed-overfill"]);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["isolab", "list", "--json", "--database-url", "postgres://x/y"])
            .unwrap();
        assert!(matches.get_flag("json"));
        assert_eq!(
            matches.get_one::<String>("database-url").map(String::as_str),
            Some("postgres://x/y")
        );
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(build_cli().try_get_matches_from(["isolab"]).is_err());
    }
}
