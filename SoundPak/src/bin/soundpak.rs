fn main() -> anyhow::Result<()> {
    soundpak::cli::run_cli()
}
