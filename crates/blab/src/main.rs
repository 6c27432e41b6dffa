//! blabber - chat through a blabber relay from the terminal

fn main() -> anyhow::Result<()> {
    blab::cli::run()
}
