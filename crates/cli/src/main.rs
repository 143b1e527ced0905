use clap::{Parser, Subcommand};
use forms_core::config::{parse_intent, resolve_dir};
use forms_core::constants::{DEFAULT_FORMS_DIR, DEFAULT_INTENT, DEFAULT_REGISTRY_DIR};
use forms_core::{
    apply_form_intent, AmbientDefaults, EncounterContext, FormIntent, FormLoader, FormRegistry,
    FormSession, SessionMode, StaticFormSource,
};
use openmrs::OpenmrsEncounter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "forms")]
#[command(about = "Clinical form engine CLI")]
struct Cli {
    /// Packaged form registry directory (default: form-registry/)
    #[arg(long, global = true)]
    registry_dir: Option<PathBuf>,
    /// Directory of named form documents (default: forms/)
    #[arg(long, global = true)]
    forms_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the stored versions of a packaged form
    Versions {
        /// Form package
        package: String,
        /// Form namespace within the package
        namespace: String,
    },
    /// Print a packaged form with its sub-forms attached and an intent applied
    Get {
        /// Form package
        package: String,
        /// Form namespace within the package
        namespace: String,
        /// Version or range (e.g. 1, 1.2, ^1.2.0); the latest when omitted
        #[arg(long)]
        version: Option<String>,
        /// Fail instead of falling back to the latest version
        #[arg(long)]
        strict: bool,
        /// Intent to apply
        #[arg(long, default_value = DEFAULT_INTENT)]
        intent: String,
    },
    /// Resolve a named form (or a JSON file) and apply an intent
    Resolve {
        /// Form uuid or name
        identifier: Option<String>,
        /// Raw form JSON file instead of an identifier
        #[arg(long)]
        file: Option<PathBuf>,
        /// Intent to apply
        #[arg(long, default_value = DEFAULT_INTENT)]
        intent: String,
    },
    /// List the intents a form declares
    Intents {
        /// Form uuid or name
        identifier: String,
    },
    /// Build the encounter payload for a set of values without saving it
    Prepare {
        /// Form uuid or name
        identifier: String,
        /// Intent to apply
        #[arg(long, default_value = DEFAULT_INTENT)]
        intent: String,
        /// JSON object of field id to value
        #[arg(long)]
        values: PathBuf,
        /// Saved encounter JSON to edit
        #[arg(long)]
        encounter: Option<PathBuf>,
        /// Patient uuid
        #[arg(long)]
        patient: Option<String>,
        /// Location used when the form does not capture one
        #[arg(long)]
        location: Option<String>,
        /// Provider used when the form does not capture one
        #[arg(long)]
        provider: Option<String>,
    },
}

fn read_json(path: &Path) -> CliResult<Value> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn registry(dir: Option<PathBuf>) -> CliResult<FormRegistry> {
    let dir = resolve_dir(dir, DEFAULT_REGISTRY_DIR)?;
    Ok(FormRegistry::load_dir(&dir)?)
}

fn loader(dir: Option<PathBuf>) -> CliResult<FormLoader<StaticFormSource>> {
    let dir = resolve_dir(dir, DEFAULT_FORMS_DIR)?;
    Ok(FormLoader::new(StaticFormSource::load_dir(&dir)?))
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Versions { package, namespace }) => {
            match registry(cli.registry_dir)?.lookup_forms(&package, &namespace) {
                Ok(forms) => {
                    for form in forms {
                        println!("{}", form.version);
                    }
                }
                Err(e) => eprintln!("Error listing versions: {}", e),
            }
        }
        Some(Commands::Get {
            package,
            namespace,
            version,
            strict,
            intent,
        }) => match registry(cli.registry_dir)?.get_form(
            &package,
            &namespace,
            version.as_deref(),
            strict,
        ) {
            Ok(schema) => {
                print_json(&apply_form_intent(&parse_intent(&intent)?, &schema, &[]))?
            }
            Err(e) => eprintln!("Error getting form: {}", e),
        },
        Some(Commands::Resolve {
            identifier,
            file,
            intent,
        }) => {
            let raw = file.as_deref().map(read_json).transpose()?;
            let loader = loader(cli.forms_dir)?;
            match loader
                .load_form_json(identifier.as_deref(), raw, &parse_intent(&intent)?)
                .await
            {
                Ok(schema) => print_json(&schema)?,
                Err(e) => eprintln!("Error resolving form: {}", e),
            }
        }
        Some(Commands::Intents { identifier }) => {
            let loader = loader(cli.forms_dir)?;
            match loader
                .load_form_json(Some(&identifier), None, &FormIntent::default())
                .await
            {
                Ok(schema) if schema.available_intents.is_empty() => {
                    println!("{} declares no intents", schema.name)
                }
                Ok(schema) => {
                    for descriptor in schema.available_intents {
                        println!(
                            "{}\t{}",
                            descriptor.intent,
                            descriptor.display.unwrap_or_default()
                        );
                    }
                }
                Err(e) => eprintln!("Error loading form: {}", e),
            }
        }
        Some(Commands::Prepare {
            identifier,
            intent,
            values,
            encounter,
            patient,
            location,
            provider,
        }) => {
            let values: BTreeMap<String, Value> = serde_json::from_value(read_json(&values)?)?;
            let encounter: Option<OpenmrsEncounter> = encounter
                .as_deref()
                .map(read_json)
                .transpose()?
                .map(serde_json::from_value)
                .transpose()?;

            let loader = loader(cli.forms_dir)?;
            let schema = match loader
                .load_form_json(Some(&identifier), None, &parse_intent(&intent)?)
                .await
            {
                Ok(schema) => schema,
                Err(e) => {
                    eprintln!("Error loading form: {}", e);
                    return Ok(());
                }
            };

            let mode = if encounter.is_some() {
                SessionMode::Edit
            } else {
                SessionMode::Enter
            };
            let mut ctx = EncounterContext::new(schema.name.clone(), mode).with_defaults(
                AmbientDefaults {
                    location,
                    provider,
                    ..Default::default()
                },
            );
            if let Some(patient) = patient {
                ctx = ctx.with_patient(patient);
            }

            let mut session = FormSession::new(schema, ctx);
            session.hydrate(encounter);
            for (field_id, value) in values {
                if let Err(e) = session.set_value(&field_id, value) {
                    eprintln!("Error setting '{}': {}", field_id, e);
                }
            }
            match session.prepare() {
                Ok(payload) => print_json(&payload)?,
                Err(e) => eprintln!("Error preparing encounter: {}", e),
            }
        }
        None => {
            println!("Use 'forms --help' for commands");
        }
    }

    Ok(())
}
