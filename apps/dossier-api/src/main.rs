// crates.io
use clap::Parser;
// self
use dossier_api::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	dossier_api::run(args).await
}
