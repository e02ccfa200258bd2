/*!
chatsql Command Line Interface

Ask questions about a database in plain language, run SQL directly, or poke at the
reply protocol and chart classifier.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatsql::audit::AuditTrail;
use chatsql::chat::{ChatController, Conversation, TurnOutcome};
use chatsql::completion::OpenRouterClient;
use chatsql::chart::palettes;
use chatsql::config::{self, ChatSettings, CompletionSettings, Settings};
use chatsql::execute::{QueryExecutor, QueryMetadata, QuerySource};
use chatsql::reader::{self, data};
use chatsql::store;
use chatsql::visualization::Transformer;
use chatsql::{classify, protocol, VERSION};

#[cfg(feature = "vegalite")]
use chatsql::writer::{VegaLiteWriter, Writer};

#[derive(Parser)]
#[command(name = "chatsql")]
#[command(about = "Conversational SQL analytics")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive conversation (one question per line)
    Chat {
        #[command(flatten)]
        env: EnvArgs,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question to ask
        question: String,

        #[command(flatten)]
        env: EnvArgs,
    },

    /// Execute a SQL statement directly
    Sql {
        /// The statement to execute
        query: String,

        /// Shape the result as a chart (metric, bar, line, pie)
        #[arg(long)]
        chart: Option<String>,

        /// Render the chart with a writer (vegalite)
        #[arg(long)]
        writer: Option<String>,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        env: EnvArgs,
    },

    /// Split a completion reply into its protocol sections (reads stdin without FILE)
    Parse {
        file: Option<PathBuf>,
    },

    /// Suggest a chart kind for a metric
    Classify {
        /// Metric name
        #[arg(long, default_value = "")]
        name: String,

        /// How the metric is calculated
        #[arg(long, default_value = "")]
        calculation: String,
    },

    /// Print the system instruction sent to the completion service
    Prompt {
        #[command(flatten)]
        env: EnvArgs,
    },
}

/// Options shared by every command that touches a database
#[derive(Args, Clone)]
pub struct EnvArgs {
    /// Data source connection string
    #[arg(long, default_value = "duckdb://memory")]
    reader: String,

    /// Load the sample customers/orders tables into the reader
    #[arg(long)]
    load_sample_data: bool,

    /// Session and audit store (`memory` or a SQLite file path)
    #[arg(long, default_value = "memory")]
    store: String,

    /// Completion model
    #[arg(long, env = "CHATSQL_MODEL", default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Completion API key
    #[arg(long, env = "OPENROUTER_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Chat-completions endpoint
    #[arg(long, env = "CHATSQL_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// Completion timeout in seconds (0 = no limit)
    #[arg(long, default_value = "60")]
    completion_timeout: u64,

    /// SQL execution timeout in seconds (0 = no limit)
    #[arg(long, default_value = "0")]
    query_timeout: u64,

    #[command(flatten)]
    chart: ChartArgs,
}

/// Chart styling and column binding
#[derive(Args, Clone)]
pub struct ChartArgs {
    /// Color of single-series charts (any CSS color)
    #[arg(long, default_value = palettes::BRAND)]
    brand_color: String,

    /// Pie chart colors, comma-separated
    #[arg(long, value_delimiter = ',')]
    palette: Vec<String>,

    /// Column holding chart labels (requires --value-column)
    #[arg(long)]
    label_column: Option<String>,

    /// Column holding chart values (requires --label-column)
    #[arg(long)]
    value_column: Option<String>,
}

impl ChartArgs {
    fn apply(&self, chat: ChatSettings) -> chatsql::Result<ChatSettings> {
        chat.with_colors(&self.brand_color, &self.palette)?
            .with_columns(self.label_column.clone(), self.value_column.clone())
    }
}

impl EnvArgs {
    fn settings(&self) -> chatsql::Result<Settings> {
        let mut settings = Settings {
            completion: CompletionSettings {
                api_url: self.api_url.clone(),
                api_key: self.api_key.clone(),
                model: self.model.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        settings.chat.completion_timeout = config::seconds(Some(self.completion_timeout));
        settings.chat.query_timeout = config::seconds(Some(self.query_timeout));
        settings.chat = self.chart.apply(settings.chat)?;
        Ok(settings)
    }

    /// Wire readers, stores and the audit trail into a controller.
    ///
    /// The returned handle is the audit worker; pass both to [`finish`].
    async fn controller(&self) -> anyhow::Result<(ChatController, JoinHandle<()>)> {
        let settings = self.settings()?;
        let reader = reader::connect(&self.reader)?;
        if self.load_sample_data {
            data::load_sample_data(reader.as_ref()).await?;
        }

        let store = store::open(&self.store)?;
        let (audit, worker) = AuditTrail::spawn(store.clone().as_query_log());
        let executor = QueryExecutor::new(reader, audit).with_timeout(settings.chat.query_timeout);
        let completion = Arc::new(OpenRouterClient::new(settings.completion));

        let controller = ChatController::new(
            completion,
            store.as_session_store(),
            executor,
            settings.chat,
        )
        .with_schema()
        .await?;
        Ok((controller, worker))
    }
}

/// Close the audit channel and wait for queued entries to be written
async fn finish(controller: ChatController, worker: JoinHandle<()>) {
    drop(controller);
    drain_audit(worker).await;
}

async fn drain_audit(worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "Audit worker stopped unexpectedly");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatsql=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { env } => run_chat(&env).await,
        Commands::Ask { question, env } => {
            let (controller, worker) = env.controller().await?;
            let mut conversation = Conversation::new();
            let outcome = controller.submit(&mut conversation, &question).await;
            finish(controller, worker).await;
            print_reply(&conversation)?;
            if let TurnOutcome::Failed(e) = outcome {
                bail!(e);
            }
            Ok(())
        }
        Commands::Sql {
            query,
            chart,
            writer,
            output,
            env,
        } => run_sql(&env, &query, chart.as_deref(), writer.as_deref(), output).await,
        Commands::Parse { file } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            let parsed = protocol::parse(&raw);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(())
        }
        Commands::Classify { name, calculation } => {
            let kind = classify(&calculation, &name);
            println!("{} ({})", kind, kind.label());
            Ok(())
        }
        Commands::Prompt { env } => {
            let (controller, worker) = env.controller().await?;
            println!("{}", controller.system_prompt());
            finish(controller, worker).await;
            Ok(())
        }
    }
}

async fn run_chat(env: &EnvArgs) -> anyhow::Result<()> {
    let (controller, worker) = env.controller().await?;
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("chatsql {} - type a question, or 'exit' to quit", VERSION);
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if let TurnOutcome::Ignored = controller.submit(&mut conversation, line).await {
            continue;
        }
        print_reply(&conversation)?;
        println!();
    }
    finish(controller, worker).await;
    Ok(())
}

fn print_reply(conversation: &Conversation) -> anyhow::Result<()> {
    let Some(message) = conversation.last_message() else {
        return Ok(());
    };
    println!("{}", message.content);
    if let Some(table) = &message.table {
        println!("{}", serde_json::to_string_pretty(&table.rows)?);
    }
    if let Some(viz) = &message.visualization {
        println!("{}", serde_json::to_string_pretty(viz)?);
    }
    Ok(())
}

async fn run_sql(
    env: &EnvArgs,
    query: &str,
    chart: Option<&str>,
    writer: Option<&str>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let chat = env.settings()?.chat;
    let reader = reader::connect(&env.reader)?;
    if env.load_sample_data {
        data::load_sample_data(reader.as_ref()).await?;
    }
    let store = store::open(&env.store)?;
    let (audit, worker) = AuditTrail::spawn(store.as_query_log());
    let executor = QueryExecutor::new(reader, audit).with_timeout(chat.query_timeout);

    let result = executor
        .execute(query, QueryMetadata::new(QuerySource::Scientist))
        .await?;
    // Close the channel so the pending audit write lands before exit
    drop(executor);
    drain_audit(worker).await;

    let visualization = match chart {
        Some(tag) => Transformer::new()
            .with_binding(chat.column_binding)
            .with_style(chat.style)
            .transform(&result.data, Some(tag))?,
        None => None,
    };

    let rendered = match (writer, &visualization) {
        (None, _) => {
            let mut body = serde_json::json!({ "result": result });
            if let Some(viz) = &visualization {
                body["visualization"] = serde_json::to_value(viz)?;
            }
            serde_json::to_string_pretty(&body)?
        }
        (Some(_), None) => bail!("--writer requires --chart and a non-empty result"),
        #[cfg(feature = "vegalite")]
        (Some("vegalite"), Some(viz)) => VegaLiteWriter::new().write(viz)?,
        (Some(other), Some(_)) => bail!("Unknown writer: {}", other),
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Output written to: {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
