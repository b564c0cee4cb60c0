use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info};

use listing_moderation::{
    ConfigError, ImageAsset, ImageError, ModerationContext, PipelineResult, Settings, Verdict,
    logging,
};

const USAGE: &str = "usage: moderate <property-id> <uploader-id> <image>...";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [property_id, uploader_id, paths @ ..] = args.as_slice() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    if paths.is_empty() {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    }

    let ctx = ModerationContext::new(property_id.as_str(), uploader_id.as_str());
    match run(ctx, paths).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "moderation run failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every image was approved.
async fn run(ctx: ModerationContext, paths: &[String]) -> Result<bool, CliError> {
    let settings = Settings::from_env()?;
    let pipeline = settings.pipeline().await?;

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(ImageAsset::read(path).await?);
    }

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .map_err(|source| CliError::Write {
            path: settings.output_dir.display().to_string(),
            source,
        })?;

    let results = pipeline.submit_all(images, &ctx).await;

    let mut all_approved = true;
    for (path, result) in paths.iter().zip(&results) {
        let written = write_output(&settings.output_dir, Path::new(path), result).await?;
        report(path, result, written.as_deref());
        all_approved &= result.verdict() == Verdict::Approved;
    }

    info!(
        images = results.len(),
        approved = results.iter().filter(|r| r.verdict() == Verdict::Approved).count(),
        "moderation run complete"
    );
    Ok(all_approved)
}

async fn write_output(
    dir: &Path,
    source: &Path,
    result: &PipelineResult,
) -> Result<Option<PathBuf>, CliError> {
    let Some(stamped) = &result.watermarked else {
        return Ok(None);
    };
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| result.audit.image_id.clone());
    let extension = stamped.format().map(|f| f.extension()).unwrap_or("img");
    let target = dir.join(format!("{}.watermarked.{}", stem, extension));

    tokio::fs::write(&target, stamped.bytes())
        .await
        .map_err(|source| CliError::Write {
            path: target.display().to_string(),
            source,
        })?;
    Ok(Some(target))
}

fn report(path: &str, result: &PipelineResult, written: Option<&Path>) {
    match (result.verdict(), result.decision.category(), written) {
        (Verdict::Approved, _, Some(out)) => {
            println!("{}\tapproved\t{}", path, out.display());
        }
        (verdict, Some(category), _) => println!("{}\t{}\t{}", path, verdict, category),
        (verdict, None, _) => println!("{}\t{}", path, verdict),
    }
}
