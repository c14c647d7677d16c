fn main() -> anyhow::Result<()> {
    specpack::run()?;
    Ok(())
}
