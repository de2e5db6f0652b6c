mod cli;
mod tensors;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use tensorport_client::{
    ClientConfig, Headers, InferRequestBuilder, InferResult, InferenceServerClient,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).context("invalid --log filter")?)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::default()
        .with_connect_timeout(Duration::from_secs(10))
        .with_headers(cli.headers.into_iter().collect::<Headers>());
    if let Some(ms) = cli.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }

    let client = InferenceServerClient::connect(&cli.url, config)
        .await
        .with_context(|| format!("connecting to {}", cli.url))?;
    tracing::debug!(url = %client.url(), "connected");

    match cli.command {
        Command::Live => {
            let live = client.is_server_live().await?;
            println!("live: {live}");
            if !live {
                bail!("server is not live");
            }
        }
        Command::Ready {
            model,
            model_version,
        } => {
            let ready = match &model {
                Some(model) => client.is_model_ready(model, &model_version).await?,
                None => client.is_server_ready().await?,
            };
            println!("ready: {ready}");
            if !ready {
                bail!("{} is not ready", model.as_deref().unwrap_or("server"));
            }
        }
        Command::Metadata {
            model: None, ..
        } => {
            let meta = client.server_metadata().await?;
            println!("{} {}", meta.name, meta.version);
            for ext in meta.extensions {
                println!("  extension {ext}");
            }
        }
        Command::Metadata {
            model: Some(model),
            model_version,
        } => {
            let meta = client.model_metadata(&model, &model_version).await?;
            println!("{} ({}) versions {:?}", meta.name, meta.platform, meta.versions);
            for t in &meta.inputs {
                println!("  input  {} {} {:?}", t.name, t.datatype, t.shape);
            }
            for t in &meta.outputs {
                println!("  output {} {} {:?}", t.name, t.datatype, t.shape);
            }
        }
        Command::Models { ready } => {
            for m in client.model_repository_index(ready).await? {
                println!("{} {} {} {}", m.name, m.version, m.state, m.reason);
            }
        }
        Command::Infer {
            model,
            model_version,
            inputs,
            outputs,
            id,
        } => {
            let mut builder = InferRequestBuilder::new(model).model_version(model_version);
            if let Some(id) = id {
                builder = builder.request_id(id);
            }
            for spec in &inputs {
                builder = builder.input(tensors::parse_input(spec)?);
            }
            for name in outputs {
                builder = builder.output(name);
            }
            let result = client.infer(builder.build()?).await?;
            print_result(&result)?;
        }
        Command::Stream {
            model,
            model_version,
            sequence_id,
            steps,
            outputs,
        } => {
            if sequence_id == 0 {
                bail!("--sequence-id must be non-zero");
            }
            run_sequence(&client, &model, &model_version, sequence_id, &steps, &outputs).await?;
        }
    }

    Ok(())
}

async fn run_sequence(
    client: &InferenceServerClient,
    model: &str,
    model_version: &str,
    sequence_id: u64,
    steps: &[String],
    outputs: &[String],
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = client.start_stream(move |outcome| {
        let _ = tx.send(outcome);
    })?;

    let last = steps.len().saturating_sub(1);
    for (i, step) in steps.iter().enumerate() {
        let mut builder = InferRequestBuilder::new(model)
            .model_version(model_version)
            .request_id(format!("{sequence_id}-{i}"))
            .sequence(sequence_id, i == 0, i == last);
        for spec in step.split(';').filter(|s| !s.is_empty()) {
            builder = builder.input(tensors::parse_input(spec)?);
        }
        for name in outputs {
            builder = builder.output(name.as_str());
        }
        client.stream_infer(&mut session, builder.build()?).await?;
    }
    session.close().await;

    let mut failures = 0;
    while let Ok(outcome) = rx.try_recv() {
        match outcome {
            Ok(result) => print_result(&result)?,
            Err(e) => {
                tracing::error!(error = %e, "sequence step failed");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} steps failed", steps.len());
    }
    Ok(())
}

fn print_result(result: &InferResult) -> Result<()> {
    if let Some(id) = result.id() {
        println!("# {id}");
    }
    for output in result.outputs() {
        let tensor = result
            .as_tensor(&output.name)?
            .with_context(|| format!("output {} vanished", output.name))?;
        println!("{}", tensors::format_tensor(&output.name, &tensor));
    }
    Ok(())
}
