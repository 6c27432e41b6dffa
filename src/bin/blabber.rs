//! blabber - line-mode client for a blabberd relay

fn main() -> anyhow::Result<()> {
    blab::cli::run()
}
