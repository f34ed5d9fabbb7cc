use {super::*, sharechain::ShareChainKind};

#[derive(Clone, Default, Debug, Parser)]
#[command(group(
    clap::ArgGroup::new("chains")
        .required(false)
        .args(&["chain", "signet", "regtest", "testnet"]),
))]
pub(crate) struct Options {
    #[arg(long = "chain", value_enum, help = "Use <CHAIN>. [default: mainnet]")]
    pub(crate) chain: Option<Chain>,

    #[arg(long, short = 's', help = "Use signet. Equivalent to `--chain signet`.")]
    pub(crate) signet: bool,

    #[arg(
        long,
        short = 'r',
        help = "Use regtest. Equivalent to `--chain regtest`."
    )]
    pub(crate) regtest: bool,

    #[arg(
        long,
        short = 't',
        help = "Use testnet. Equivalent to `--chain testnet`."
    )]
    pub(crate) testnet: bool,

    #[arg(
        long,
        value_enum,
        help = "Use the share chain <SHARECHAIN>. [default: main]"
    )]
    pub(crate) sharechain: Option<ShareChainKind>,

    #[arg(long, help = "Connect to the node RPC at <RPC_URL>.")]
    pub(crate) rpc_url: Option<String>,

    #[arg(long, help = "Connect to the node RPC at <RPC_PORT>.")]
    pub(crate) rpc_port: Option<u16>,

    #[arg(long, help = "Authenticate to the node RPC as <RPC_USERNAME>.")]
    pub(crate) rpc_username: Option<String>,

    #[arg(long, help = "Authenticate to the node RPC with <RPC_PASSWORD>.")]
    pub(crate) rpc_password: Option<String>,

    #[arg(long, help = "Load the node RPC cookie file from <RPC_COOKIE_FILE>.")]
    pub(crate) rpc_cookie_file: Option<std::path::PathBuf>,
}

impl Options {
    pub(crate) fn chain(&self) -> Chain {
        if self.signet {
            Chain::Signet
        } else if self.regtest {
            Chain::Regtest
        } else if self.testnet {
            Chain::Testnet
        } else {
            self.chain.unwrap_or_default()
        }
    }

    pub(crate) fn sharechain(&self) -> ShareChainKind {
        self.sharechain.unwrap_or_default()
    }

    pub(crate) fn rpc_url(&self) -> String {
        self.rpc_url.clone().unwrap_or_else(|| {
            format!(
                "127.0.0.1:{}",
                self.rpc_port.unwrap_or(self.chain().default_rpc_port())
            )
        })
    }

    pub(crate) fn rpc_auth(&self) -> bitcoincore_rpc::Auth {
        match (&self.rpc_username, &self.rpc_password) {
            (Some(username), Some(password)) => {
                bitcoincore_rpc::Auth::UserPass(username.clone(), password.clone())
            }
            _ => match &self.rpc_cookie_file {
                Some(cookie) => bitcoincore_rpc::Auth::CookieFile(cookie.clone()),
                None => bitcoincore_rpc::Auth::None,
            },
        }
    }
}
