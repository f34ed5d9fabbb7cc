use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub(crate) enum Chain {
    #[default]
    #[value(alias = "main")]
    Mainnet,
    #[value(alias = "test")]
    Testnet,
    Signet,
    Regtest,
}

impl Chain {
    pub(crate) fn network(self) -> Network {
        match self {
            Self::Mainnet => Network::Bitcoin,
            Self::Testnet => Network::Testnet,
            Self::Signet => Network::Signet,
            Self::Regtest => Network::Regtest,
        }
    }

    pub(crate) fn default_stratum_port(self) -> u16 {
        match self {
            Self::Mainnet => 9638,
            Self::Testnet => 19638,
            Self::Signet => 39638,
            Self::Regtest => 29638,
        }
    }

    pub(crate) fn default_rpc_port(self) -> u16 {
        match self {
            Self::Mainnet => 8332,
            Self::Testnet => 18332,
            Self::Signet => 38332,
            Self::Regtest => 18443,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        })
    }
}
