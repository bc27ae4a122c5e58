//! Bitcoin peer network. Eg. *Mainnet*.
use bitcoin::consensus::params::Params;

use crate::time::LocalDuration;

/// Bitcoin peer network.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Network {
    /// Bitcoin Mainnet.
    #[default]
    Mainnet,
    /// Bitcoin Testnet.
    Testnet,
    /// Bitcoin regression test net.
    Regtest,
    /// Bitcoin signet.
    Signet,
}

impl From<Network> for bitcoin::Network {
    fn from(value: Network) -> Self {
        match value {
            Network::Mainnet => Self::Bitcoin,
            Network::Testnet => Self::Testnet,
            Network::Regtest => Self::Regtest,
            Network::Signet => Self::Signet,
        }
    }
}

impl Network {
    /// Get the consensus parameters for this network.
    pub fn params(&self) -> Params {
        Params::new((*self).into())
    }

    /// Target spacing between blocks.
    pub fn pow_target_spacing(&self) -> LocalDuration {
        LocalDuration::from_secs(self.params().pow_target_spacing)
    }
}
