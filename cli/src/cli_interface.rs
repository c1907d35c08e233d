use clap::{Parser, Subcommand};
use insurance_etl::schema::{EntityKind, ParseEntityKindError};

#[allow(clippy::upper_case_acronyms)]
#[derive(Parser, Debug)]
#[clap(name = "insurance-etl", about, version)]
pub struct CLI {
    #[clap(subcommand)]
    pub command: Commands,
}

fn parse_entity(value: &str) -> Result<EntityKind, String> {
    value.parse().map_err(|e: ParseEntityKindError| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates a new project with a starter manifest, an .env file and an empty data folder.
    ///
    /// Example:
    /// `insurance-etl init --name insurance`
    #[clap(name = "init")]
    Init {
        /// optional - The project name written to the manifest, defaults to the folder name.
        #[clap(long, short)]
        name: Option<String>,

        /// optional - The path to create the project in, default will be where the command is run.
        #[clap(long, short)]
        path: Option<String>,
    },

    /// Extracts, cleans and upserts every entity in the manifest into the warehouse.
    ///
    /// Example:
    /// `insurance-etl run` or `insurance-etl run --entity claims --entity policies --dry-run`
    #[clap(name = "run")]
    Run {
        /// optional - Only run these entities, may be repeated.
        #[clap(long = "entity", short, value_parser = parse_entity)]
        entities: Vec<EntityKind>,

        /// Load into an in-memory warehouse instead of Postgres, nothing is written.
        #[clap(long)]
        dry_run: bool,

        /// Log level, one of trace, debug, info, warn, error or off.
        #[clap(long, default_value = "info")]
        log_level: String,

        /// optional - The path to run the command in, default will be where the command is run.
        #[clap(long, short)]
        path: Option<String>,
    },

    /// Appends synthetic rows to the source CSV files, continuing their id sequences.
    ///
    /// Example:
    /// `insurance-etl generate --entity claims --rows 500 --seed 7`
    #[clap(name = "generate")]
    Generate {
        /// optional - Only generate this entity, by default every entity in the manifest.
        #[clap(long, short, value_parser = parse_entity)]
        entity: Option<EntityKind>,

        #[clap(long, default_value_t = 200)]
        rows: usize,

        /// Share of rows that repeat an earlier generated row, between 0 and 1.
        #[clap(long, default_value_t = 0.05)]
        duplicate_rate: f64,

        #[clap(long)]
        seed: Option<u64>,

        /// optional - The path to run the command in, default will be where the command is run.
        #[clap(long, short)]
        path: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_repeated_entities() {
        let cli = CLI::try_parse_from([
            "insurance-etl",
            "run",
            "--entity",
            "claims",
            "-e",
            "Policy",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { entities, dry_run, log_level, path } => {
                assert_eq!(entities, vec![EntityKind::Claims, EntityKind::Policies]);
                assert!(dry_run);
                assert_eq!(log_level, "info");
                assert_eq!(path, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        assert!(CLI::try_parse_from(["insurance-etl", "run", "--entity", "brokers"]).is_err());
    }

    #[test]
    fn test_generate_defaults() {
        let cli = CLI::try_parse_from(["insurance-etl", "generate", "--seed", "7"]).unwrap();

        match cli.command {
            Commands::Generate { entity, rows, duplicate_rate, seed, .. } => {
                assert_eq!(entity, None);
                assert_eq!(rows, 200);
                assert_eq!(duplicate_rate, 0.05);
                assert_eq!(seed, Some(7));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
