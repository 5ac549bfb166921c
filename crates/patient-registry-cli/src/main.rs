//! Patient Registry CLI - register, list, edit patients and run console queries

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use patient_registry_core::{
    ChannelHub, Patient, PatientFields, QueryResult, Registry, RegistryConfig, StrategyKind,
};
use serde_json::Value;
use tabled::{builder::Builder, settings::Style};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "patient-registry")]
#[command(version)]
#[command(about = "Local-first patient registration with an SQL console")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true, default_value = "patient-registry.toml")]
    config: PathBuf,

    /// Use a transient in-memory database
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new patient
    Add(FieldArgs),

    /// List all patients by name
    List,

    /// Show one patient
    Show { id: i64 },

    /// Replace a patient's details
    Update {
        id: i64,
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Delete a patient
    Delete { id: i64 },

    /// Run a single SQL statement
    Query { sql: String },
}

#[derive(Args)]
struct FieldArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    dob: NaiveDate,
    /// male, female, other or prefer_not_to_say
    #[arg(long)]
    gender: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    address: Option<String>,
}

impl FieldArgs {
    fn into_fields(self) -> anyhow::Result<PatientFields> {
        let fields = PatientFields {
            first_name: self.first_name,
            last_name: self.last_name,
            date_of_birth: self.dob,
            gender: self.gender,
            email: self.email,
            phone: self.phone,
            address: self.address,
        };
        fields.validate()?;
        Ok(fields)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = RegistryConfig::load_or_default(&cli.config)?;
    if cli.memory {
        config.strategies = vec![StrategyKind::Memory];
    }
    tracing::debug!(
        config = %cli.config.display(),
        strategies = ?config.strategies,
        "configuration loaded"
    );

    let hub = ChannelHub::new();
    let (registry, _endpoint) = Registry::connect(config, &hub);
    registry.initialize().await?;

    match cli.command {
        Commands::Add(args) => {
            let fields = args.into_fields()?;
            let id = registry.insert_patient(&fields).await?;
            println!("Registered patient #{}", id);
        }
        Commands::List => {
            let patients = registry.list_patients().await?;
            if patients.is_empty() {
                println!("No patients registered.");
            } else {
                println!("{}", patients_table(&patients));
            }
        }
        Commands::Show { id } => match registry.get_patient(id).await? {
            Some(patient) => println!("{}", patients_table(std::slice::from_ref(&patient))),
            None => println!("Patient #{} not found.", id),
        },
        Commands::Update { id, fields } => {
            let fields = fields.into_fields()?;
            if registry.update_patient(id, &fields).await? {
                println!("Updated patient #{}", id);
            } else {
                println!("Patient #{} not found.", id);
            }
        }
        Commands::Delete { id } => {
            if registry.delete_patient(id).await? {
                println!("Deleted patient #{}", id);
            } else {
                println!("Patient #{} not found.", id);
            }
        }
        Commands::Query { sql } => {
            let result = registry.execute(&sql).await?;
            println!("{}", query_table(&result));
            if result.is_rows() {
                println!("({} row(s))", result.row_count());
            }
        }
    }

    Ok(())
}

fn patients_table(patients: &[Patient]) -> String {
    let mut builder = Builder::default();
    builder.push_record([
        "ID", "Name", "Date of birth", "Gender", "Email", "Phone", "Address",
    ]);
    for p in patients {
        builder.push_record([
            p.id.to_string(),
            p.display_name(),
            p.date_of_birth.to_string(),
            p.gender.clone(),
            p.email.clone().unwrap_or_default(),
            p.phone.clone().unwrap_or_default(),
            p.address.clone().unwrap_or_default(),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

/// Render rows or a command summary with the same generic table.
fn query_table(result: &QueryResult) -> String {
    let columns = result.columns();
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for record in result.records() {
        builder.push_record(
            columns
                .iter()
                .map(|column| cell(record.get(column).unwrap_or(&Value::Null))),
        );
    }
    builder.build().with(Style::rounded()).to_string()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
