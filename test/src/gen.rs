//! Random value generators.
use std::net;

use bulwark_common::bitcoin::{
    OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use bulwark_common::bitcoin_hashes::Hash as _;
use bulwark_common::p2p::{NetAddr, Service};

/// Generates a random transaction id.
pub fn txid(rng: &mut fastrand::Rng) -> Txid {
    let mut bytes = [0u8; 32];
    for b in bytes.iter_mut() {
        *b = rng.u8(..);
    }
    Txid::from_inner(bytes)
}

/// Generates a random transaction output.
pub fn tx_out(rng: &mut fastrand::Rng) -> TxOut {
    let script = std::iter::repeat_with(|| rng.u8(..))
        .take(rng.usize(1..=25))
        .collect::<Vec<_>>();

    TxOut {
        value: rng.u64(1..100_000_000),
        script_pubkey: Script::from(script),
    }
}

/// Generates an input spending the given outpoint.
pub fn tx_in(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: Script::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// Generates a random transaction spending random (unknown) outputs.
pub fn transaction(rng: &mut fastrand::Rng) -> Transaction {
    let input = (0..rng.usize(1..8))
        .map(|_| {
            tx_in(OutPoint {
                txid: txid(rng),
                vout: rng.u32(0..16),
            })
        })
        .collect();

    transaction_with(input, rng)
}

/// Generates a transaction with the given inputs and random outputs.
pub fn transaction_with(input: Vec<TxIn>, rng: &mut fastrand::Rng) -> Transaction {
    let output = (0..rng.usize(1..8)).map(|_| tx_out(rng)).collect();

    Transaction {
        version: 1,
        lock_time: PackedLockTime::ZERO,
        input,
        output,
    }
}

/// Generates a transaction spending the given output of `parent`.
pub fn child(parent: &Transaction, vout: u32, rng: &mut fastrand::Rng) -> Transaction {
    transaction_with(
        vec![tx_in(OutPoint {
            txid: parent.txid(),
            vout,
        })],
        rng,
    )
}

/// Generates a transaction with `count` inputs all spending outputs of `prevout`.
pub fn transaction_with_inputs(prevout: Txid, count: usize, rng: &mut fastrand::Rng) -> Transaction {
    let input = (0..count)
        .map(|vout| {
            tx_in(OutPoint {
                txid: prevout,
                vout: vout as u32,
            })
        })
        .collect();

    transaction_with(input, rng)
}

/// Generates a random routable IPv4 address.
pub fn ipv4(rng: &mut fastrand::Rng) -> NetAddr {
    NetAddr::from(net::Ipv4Addr::new(
        rng.u8(11..=223),
        rng.u8(..),
        rng.u8(..),
        rng.u8(1..255),
    ))
}

/// Generates a random routable address, IPv4 or IPv6.
pub fn net_addr(rng: &mut fastrand::Rng) -> NetAddr {
    if rng.bool() {
        ipv4(rng)
    } else {
        let mut segments = [0u16; 8];
        segments[0] = 0x2001;
        for s in segments.iter_mut().skip(1) {
            *s = rng.u16(..);
        }
        NetAddr::from(net::Ipv6Addr::from(segments))
    }
}

/// Generates a random service on the given port.
pub fn service(port: u16, rng: &mut fastrand::Rng) -> Service {
    Service::new(net_addr(rng), port)
}

/// A network address usable as a `quickcheck` input.
#[derive(Debug, Clone)]
pub struct ArbitraryNetAddr(pub NetAddr);

impl quickcheck::Arbitrary for ArbitraryNetAddr {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let mut rng = fastrand::Rng::with_seed(u64::arbitrary(g));

        Self(net_addr(&mut rng))
    }
}
