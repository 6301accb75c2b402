use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use intentforge::{
    parse_utterance, Credentials, FsModelRepository, IntentPredictor, ModelId, RuntimeConfig, SoftmaxClassifier,
    TrainingOrchestrator, TrainingSet, TrainingStatus,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct AppArgs {
    #[arg(long)]
    app_id: String,
    #[arg(long)]
    app_secret: String,
    /// Directory holding trained models (defaults to INTENTFORGE_HOME or the user cache)
    #[arg(long)]
    models_dir: Option<PathBuf>,
}

impl AppArgs {
    fn credentials(&self) -> Credentials {
        Credentials::new(&self.app_id, &self.app_secret)
    }

    fn repository(&self) -> Result<FsModelRepository> {
        let repository = match &self.models_dir {
            Some(dir) => FsModelRepository::new(dir),
            None => FsModelRepository::new_default(),
        };
        repository.context("Failed to open model directory")
    }
}

#[derive(Subcommand)]
enum Command {
    /// Strip slot annotations from an utterance and print the slots
    Parse { utterance: String },
    /// Train a model from a JSON training set
    Train {
        training_set: PathBuf,
        #[command(flatten)]
        app: AppArgs,
    },
    /// Rank the intents of a trained model for some text
    Predict {
        model_id: String,
        text: String,
        #[command(flatten)]
        app: AppArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    intentforge::init_logger();
    match Args::parse().command {
        Command::Parse { utterance } => parse(&utterance),
        Command::Train { training_set, app } => train(training_set, app).await,
        Command::Predict { model_id, text, app } => predict(&model_id, &text, app).await,
    }
}

fn parse(raw: &str) -> Result<()> {
    let parsed = parse_utterance(raw);
    println!("{}", parsed.utterance);
    for slot in &parsed.parsed_slots {
        println!(
            "  {} = {:?} at {}..{}",
            slot.name, slot.value, slot.clean_position.start, slot.clean_position.end
        );
    }
    Ok(())
}

async fn train(path: PathBuf, app: AppArgs) -> Result<()> {
    let content =
        tokio::fs::read_to_string(&path).await.with_context(|| format!("Failed to read {}", path.display()))?;
    let set: TrainingSet =
        serde_json::from_str(&content).with_context(|| format!("Invalid training set in {}", path.display()))?;

    let repository = Arc::new(app.repository()?);
    let orchestrator = TrainingOrchestrator::<SoftmaxClassifier, _>::new(repository, RuntimeConfig::from_env());
    let credentials = app.credentials();

    let start_time = Instant::now();
    let (model_id, handle) = orchestrator.start_training(set, credentials.clone());
    info!("Training model {}", model_id);

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while !handle.is_finished() {
        ticker.tick().await;
        if let Some(session) = orchestrator.get_training_status(&model_id, &credentials) {
            info!("{}: {:.0}%", session.status, session.progress * 100.0);
        }
    }
    let session = handle.await.context("Training task failed")?;

    match session.status {
        TrainingStatus::Done => {
            info!("Training finished in {:.2?}", start_time.elapsed());
            println!("{}", session.model_id);
            Ok(())
        }
        status => match session.error {
            Some(err) => bail!("Training {}: {}", status, err),
            None => bail!("Training {}", status),
        },
    }
}

async fn predict(model_id: &str, text: &str, app: AppArgs) -> Result<()> {
    let model_id: ModelId = model_id.parse()?;
    let repository = app.repository()?;
    let predictor = IntentPredictor::<SoftmaxClassifier>::load(&repository, &model_id, &app.credentials()).await?;

    for score in predictor.predict(text)? {
        println!("{}", score);
    }
    Ok(())
}
