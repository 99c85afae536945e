use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use storytime_rs::client::{Action, DEFAULT_ENDPOINT, Field, StoryController, describe_failure};
use storytime_rs::prompt::{DEFAULT_MODEL, GenerationParams};
use storytime_rs::sanitize_html;
use storytime_rs::upstream::{API_KEY_ENV, ApiKey, CompletionConfig, DEFAULT_COMPLETIONS_URL};
use storytime_rs::web::{self, Environment, WebConfig};
use termimad::{FmtText, MadSkin, terminal_size};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "storytime_rs=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(
    name = "storytime-rs",
    about = "Generate first-person training stories",
    version
)]
pub struct Cli {
    /// Emit JSON instead of rendered text.
    #[arg(long, global = true)]
    json: bool,

    /// Dotenv file read before settings are resolved. Missing files are ignored.
    #[arg(long, global = true, default_value = ".env.local")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the story generation HTTP service.
    Serve(ServeArgs),
    /// Request a story from a running service.
    Generate(GenerateArgs),
    /// Sanitize HTML from a file or stdin.
    Sanitize {
        /// File to read; stdin when omitted.
        file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "STORYTIME_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
    /// Deployment environment; selects the default CORS origins.
    #[arg(long, env = "STORYTIME_ENV", default_value = "development")]
    environment: Environment,
    /// Origin allowed to call the API. Repeatable.
    #[arg(
        long = "allowed-origin",
        env = "STORYTIME_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    allowed_origins: Vec<String>,
    /// Directory of front-end assets served for unmatched paths.
    #[arg(long, env = "STORYTIME_STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// Chat-completion endpoint.
    #[arg(long, env = "STORYTIME_COMPLETIONS_URL", default_value = DEFAULT_COMPLETIONS_URL)]
    completions_url: String,
    #[arg(long, env = "STORYTIME_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
    /// Upstream request timeout in seconds.
    #[arg(long, env = "STORYTIME_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Story endpoint of a running service.
    #[arg(long, env = "STORYTIME_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    /// What the session covers. Filled in when empty.
    #[arg(long)]
    training_details: Option<String>,
    /// Something about you to weave into the story. Filled in when empty.
    #[arg(long)]
    personal_statement: Option<String>,
    /// Seed for the filler used on empty fields.
    #[arg(long)]
    seed: Option<u64>,
    /// Ask for a new variation instead of a first story.
    #[arg(long)]
    regenerate: bool,
    /// Print the sanitized HTML instead of rendered text.
    #[arg(long)]
    raw: bool,
    /// Also write the story's plain text to this file.
    #[arg(long)]
    copy_to: Option<PathBuf>,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    // Settings fall back to the environment, so parse again once the file is loaded.
    let cli = match dotenvy::from_path(&cli.env_file) {
        Ok(()) => Cli::parse(),
        Err(err) if err.not_found() => cli,
        Err(err) => {
            return Err(format!("failed to load {}: {err}", cli.env_file.display()).into());
        }
    };
    init_tracing();

    match cli.command {
        Command::Serve(args) => handle_serve(args),
        Command::Generate(args) => handle_generate(args, cli.json),
        Command::Sanitize { file } => handle_sanitize(file, cli.json),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

fn handle_serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    let config = WebConfig {
        addr: args.addr,
        environment: args.environment,
        allowed_origins: args.allowed_origins,
        static_dir: args.static_dir,
        completions: CompletionConfig {
            endpoint: args.completions_url,
            model: args.model,
            params: GenerationParams::default(),
            timeout: Duration::from_secs(args.timeout_secs),
        },
        api_key: ApiKey::from_env(API_KEY_ENV),
    };
    runtime()?.block_on(web::serve(config))?;
    Ok(())
}

fn handle_generate(args: GenerateArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let mut controller = match args.seed {
        Some(seed) => StoryController::with_seed(args.endpoint.as_str(), seed),
        None => StoryController::new(args.endpoint.as_str()),
    };
    if let Some(text) = args.training_details {
        controller.set_field(Field::TrainingDetails, text);
    }
    if let Some(text) = args.personal_statement {
        controller.set_field(Field::PersonalStatement, text);
    }
    let action = if args.regenerate {
        Action::Regenerate
    } else {
        Action::Generate
    };

    let outcome = runtime()?
        .block_on(controller.run(action))
        .ok_or("a story request is already in flight")?
        .map(|story| story.clone());
    let story = match outcome {
        Ok(story) => story,
        Err(err) => return Err(describe_failure(action, &err).into()),
    };
    if story.fragment().is_empty() {
        return Err("the generated story was empty after sanitization".into());
    }
    info!(
        training_details = controller.field(Field::TrainingDetails),
        personal_statement = controller.field(Field::PersonalStatement),
        "story generated"
    );
    let text = controller.copy_text().unwrap_or_default();

    if let Some(path) = &args.copy_to {
        fs::write(path, &text)?;
        info!(path = %path.display(), "story text written");
    }

    if as_json {
        let payload = json!({ "story": story.html(), "text": text });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if args.raw {
        println!("{}", story.html());
    } else if stdout_is_tty() {
        render_markdown(&story.markdown());
    } else {
        println!("{text}");
    }
    Ok(())
}

fn handle_sanitize(file: Option<PathBuf>, as_json: bool) -> Result<(), Box<dyn Error>> {
    let input = match file {
        Some(path) => fs::read_to_string(&path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let html = sanitize_html(&input);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "html": html }))?);
    } else {
        println!("{html}");
    }
    Ok(())
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown(body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    let skin = MadSkin::default();
    let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
    println!("{formatted}");
}
