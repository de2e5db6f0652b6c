use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tensorport", version, about = "KServe v2 inference client")]
pub struct Cli {
    /// Server address (host:port or URL)
    #[arg(long, global = true, env = "TENSORPORT_URL", default_value = "localhost:8001")]
    pub url: String,

    /// Extra request header as NAME=VALUE (repeatable)
    #[arg(long = "header", global = true, value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Per-request deadline in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Log level (RUST_LOG syntax)
    #[arg(long, global = true, default_value = "warn")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the server is live
    Live,

    /// Check that the server, or one model, is ready
    Ready {
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "")]
        model_version: String,
    },

    /// Print server metadata, or a model's when --model is given
    Metadata {
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "")]
        model_version: String,
    },

    /// List the models in the server's repository
    Models {
        /// Only models that are loaded
        #[arg(long)]
        ready: bool,
    },

    /// Run one inference
    Infer {
        #[arg(long)]
        model: String,

        #[arg(long, default_value = "")]
        model_version: String,

        /// Input as NAME:DTYPE:DIMS:VALUES, e.g. INPUT0:INT32:2x2:1,2,3,4
        #[arg(long = "input", required = true)]
        inputs: Vec<String>,

        /// Output to request (all outputs when omitted)
        #[arg(long = "output")]
        outputs: Vec<String>,

        #[arg(long)]
        id: Option<String>,
    },

    /// Run a sequence over one stream, one request per --step
    Stream {
        #[arg(long)]
        model: String,

        #[arg(long, default_value = "")]
        model_version: String,

        /// Must be non-zero
        #[arg(long)]
        sequence_id: u64,

        /// Inputs of one step, `;`-separated NAME:DTYPE:DIMS:VALUES specs
        #[arg(long = "step", required = true)]
        steps: Vec<String>,

        #[arg(long = "output")]
        outputs: Vec<String>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected NAME=VALUE, got {raw:?}");
    };
    if name.trim().is_empty() {
        bail!("header name is empty in {raw:?}");
    }
    Ok((name.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_parse_as_pairs() {
        assert_eq!(
            parse_header("Authorization=Bearer a=b").unwrap(),
            ("Authorization".to_string(), "Bearer a=b".to_string())
        );
        assert!(parse_header("no-equals").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "tensorport",
            "ready",
            "--model",
            "simple",
            "--url",
            "grpc.local:9000",
            "--header",
            "x-tenant=acme",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.url, "grpc.local:9000");
        assert_eq!(cli.headers, [("x-tenant".to_string(), "acme".to_string())]);
        assert_eq!(cli.timeout_ms, Some(250));
        assert!(matches!(cli.command, Command::Ready { model: Some(ref m), .. } if m == "simple"));
    }

    #[test]
    fn stream_requires_steps() {
        assert!(Cli::try_parse_from(["tensorport", "stream", "--model", "acc", "--sequence-id", "1"]).is_err());
    }
}
