//! Build command - build an installer for a package selection

use crate::build::{ArtifactDelivery, BuildPipeline, PackageSelection};
use crate::cli::args::BuildArgs;
use crate::cli::commands::template_dir;
use crate::config::Config;
use crate::error::{ForgeError, ForgeResult};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> ForgeResult<()> {
    let selections: Vec<PackageSelection> = args
        .packages
        .iter()
        .map(|(id, name)| PackageSelection::new(id, name))
        .collect();

    let template = template_dir(config).ok_or_else(|| {
        ForgeError::Internal("no template repositories configured".to_string())
    })?;

    let output_dir = match args.output {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| ForgeError::io("getting current directory", e))?,
    };

    let pipeline = BuildPipeline::new(template, output_dir, &config.build);
    let delivery = if args.zip {
        ArtifactDelivery::ZippedOutputDir
    } else {
        ArtifactDelivery::Installer
    };

    let built = pipeline.build(&selections, delivery).await?;

    println!("Built {}", built.path.display());
    if !built.workspace_cleaned {
        println!("Warning: build workspace requires manual cleanup (see logs)");
    }
    Ok(())
}
