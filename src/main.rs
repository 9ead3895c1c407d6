use std::{
    io::{self, BufRead, Write},
    ops::ControlFlow,
    time::Instant,
};

use anyhow::{Context as _, Result};
use clap::Parser;
use vellum_foundry::{BpeTokenizer, Foundry, FoundryConfig, ModelPipeline, SamplingConfig, model::FinishReason};
use vellum_instrumentation::prelude::{AppConfig, init_logging};
use vellum_loader::{GgufFile, TensorTable};

mod cli;

use cli::CliConfig;

fn main() -> Result<()> {
    let cli = CliConfig::parse();

    let app_config = AppConfig::from_env()?;
    init_logging(&app_config, cli.verbose)?;
    AppConfig::initialise(app_config)?;

    cli.validate()?;
    let config = cli.foundry_config(FoundryConfig::from_env()?);
    let mut foundry = Foundry::new_with_config(config)?;
    tracing::info!(backend = foundry.backend().name(), "foundry ready");

    let gguf = GgufFile::open(&cli.gguf_path).with_context(|| format!("failed to open {}", cli.gguf_path))?;
    let mut pipeline = ModelPipeline::load(&mut foundry, &gguf)?;
    let tokenizer = BpeTokenizer::from_metadata(gguf.metadata())?
        .with_system_prompt(foundry.config().system_prompt.clone())
        .with_chat_template(!foundry.config().disable_chat_template);

    let sampling = cli.sampling();
    let max_tokens = cli.generation.max_tokens;

    if !cli.interactive || cli.prompt.is_some() {
        run_prompt(&mut foundry, &mut pipeline, &tokenizer, &cli.get_prompt(), &sampling, max_tokens)?;
    }

    if cli.interactive {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            io::stdout().flush()?;
            let Some(line) = lines.next().transpose()? else {
                break;
            };
            let prompt = line.trim();
            if prompt.is_empty() {
                continue;
            }
            run_prompt(&mut foundry, &mut pipeline, &tokenizer, prompt, &sampling, max_tokens)?;
        }
    }

    Ok(())
}

/// Generate one answer, streaming decoded text to stdout.
fn run_prompt(
    foundry: &mut Foundry,
    pipeline: &mut ModelPipeline,
    tokenizer: &BpeTokenizer,
    prompt: &str,
    sampling: &SamplingConfig,
    max_tokens: usize,
) -> Result<()> {
    let started = Instant::now();
    let mut stdout = io::stdout().lock();
    let mut write_error = None;
    let mut produced = 0usize;

    let generation = pipeline.generate(foundry, tokenizer, prompt, sampling, |_, text| {
        produced += 1;
        if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
            write_error = Some(err);
            return ControlFlow::Break(());
        }
        if produced >= max_tokens {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    if let Some(err) = write_error {
        return Err(err).context("failed to write to stdout");
    }
    writeln!(stdout)?;

    let elapsed = started.elapsed().as_secs_f64();
    let tokens_per_sec = if elapsed > 0.0 { generation.tokens.len() as f64 / elapsed } else { 0.0 };
    tracing::info!(
        prompt_tokens = generation.prompt_tokens,
        generated = generation.tokens.len(),
        stopped_by_limit = generation.finish == FinishReason::Cancelled,
        position = pipeline.state().position,
        tokens_per_sec = format!("{tokens_per_sec:.2}"),
        "generation complete"
    );
    Ok(())
}
