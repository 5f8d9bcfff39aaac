use anyhow::{bail, Result};
use std::path::PathBuf;

use homekeep::config::Config;
use homekeep::db::Database;
use homekeep::logging;
use homekeep::migrations::{self, MigrateOptions, MigrationExecutor, MigrationGraph, Target};

enum Command {
    Migrate {
        app: Option<String>,
        name: Option<String>,
        options: MigrateOptions,
    },
    ShowMigrations,
    SqlMigrate {
        app: String,
        name: String,
        backwards: bool,
    },
    Inspect,
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut options = MigrateOptions::default();
    let mut backwards = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("homekeep {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--fake" => options.fake = true,
            "--plan" => options.plan_only = true,
            "--backwards" => backwards = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("migrate") => Command::Migrate {
            app: positional.next(),
            name: positional.next(),
            options,
        },
        Some("showmigrations") => Command::ShowMigrations,
        Some("sqlmigrate") => match (positional.next(), positional.next()) {
            (Some(app), Some(name)) => Command::SqlMigrate { app, name, backwards },
            _ => {
                eprintln!("Error: sqlmigrate requires APP and NAME");
                std::process::exit(1);
            }
        },
        Some("inspect") => Command::Inspect,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    if let Some(extra) = positional.next() {
        eprintln!("Unexpected argument: {}", extra);
        std::process::exit(1);
    }

    Args { config_path, command }
}

fn print_help() {
    println!(
        r#"homekeep - schema migrations for the homekeep database

USAGE:
    homekeep [OPTIONS] <COMMAND>

COMMANDS:
    migrate [APP [NAME|zero]]   Apply (or unapply) migrations up to a target
        --fake                  Record the change without running SQL
        --plan                  Show the plan and exit
    showmigrations              List migrations and whether they are applied
    sqlmigrate APP NAME         Print the SQL a migration would run
        --backwards             Print the SQL to unapply it instead
    inspect                     List tables and their columns

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    HOMEKEEP_CONFIG     Path to config file (overrides default location)
    HOMEKEEP_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/homekeep/config.toml"#
    );
}

fn target_for(graph: &MigrationGraph, app: Option<String>, name: Option<String>) -> Result<Target> {
    Ok(match (app, name) {
        (None, _) => Target::Latest,
        (Some(app), None) => Target::App(app),
        (Some(app), Some(name)) if name == "zero" => Target::Zero(app),
        (Some(app), Some(name)) => Target::Unit(graph.resolve(&app, &name)?),
    })
}

fn run_migrate(executor: &MigrationExecutor, target: Target, options: MigrateOptions) -> Result<()> {
    let report = executor.migrate(&target, options)?;
    if report.plan.is_empty() {
        println!("No migrations to apply.");
        return Ok(());
    }
    if options.plan_only {
        println!("Planned operations:");
        for step in &report.plan {
            println!("  {}", step);
            let migration = executor.graph().get(&step.key)?;
            for description in migration.describe() {
                let prefix = if step.backwards { "Undo " } else { "" };
                println!("    {}{}", prefix, description);
            }
        }
        return Ok(());
    }
    for key in &report.applied {
        println!("  Applying {}... OK", key);
    }
    for key in &report.unapplied {
        println!("  Unapplying {}... OK", key);
    }
    Ok(())
}

fn run_show(executor: &MigrationExecutor) -> Result<()> {
    let statuses = executor.show()?;
    let mut current_app = String::new();
    for status in &statuses {
        if status.key.app != current_app {
            current_app = status.key.app.clone();
            println!("{}", current_app);
        }
        let mark = if status.applied { "X" } else { " " };
        let drift = if status.checksum_drift { "  (changed since applied)" } else { "" };
        println!(" [{}] {}{}", mark, status.key.name, drift);
    }
    Ok(())
}

fn run_inspect(db: &Database) -> Result<()> {
    for table in db.table_names()? {
        println!("{}", table);
        for column in db.columns(&table)? {
            let mut flags = Vec::new();
            if column.primary_key {
                flags.push("pk".to_string());
            }
            if !column.not_null {
                flags.push("null".to_string());
            }
            if let Some(default) = &column.default {
                flags.push(format!("default {}", default));
            }
            println!("    {:<20} {:<28} {}", column.name, column.data_type, flags.join(", "));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.database)?;

    let graph = MigrationGraph::new(migrations::all())?;

    match args.command {
        Command::Migrate { app, name, options } => {
            if options.fake && options.plan_only {
                bail!("--fake and --plan cannot be combined");
            }
            let target = target_for(&graph, app, name)?;
            let executor = MigrationExecutor::new(&db, graph);
            run_migrate(&executor, target, options)
        }
        Command::ShowMigrations => run_show(&MigrationExecutor::new(&db, graph)),
        Command::SqlMigrate { app, name, backwards } => {
            let key = graph.resolve(&app, &name)?;
            let executor = MigrationExecutor::new(&db, graph);
            for sql in executor.sql_for(&key, backwards)? {
                println!("{};", sql);
            }
            Ok(())
        }
        Command::Inspect => run_inspect(&db),
    }
}
