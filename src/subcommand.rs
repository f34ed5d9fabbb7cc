use super::*;

pub(crate) mod serve;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "Run the stratum mining server")]
    Serve(serve::Serve),
}

impl Subcommand {
    pub(crate) async fn run(self, options: Options, cancel_token: CancellationToken) -> Result {
        match self {
            Self::Serve(serve) => serve.run(options, cancel_token).await,
        }
    }
}
