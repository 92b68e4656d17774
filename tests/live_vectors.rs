//! Known header hashes and RANDAO values from public networks.
//!
//! These talk to a real node and are ignored by default:
//!
//! ```bash
//! RANDAO_RELAY_SEPOLIA_RPC=https://... RANDAO_RELAY_MAINNET_RPC=https://... \
//!   cargo test --test live_vectors -- --ignored
//! ```

use alloy_primitives::{b256, B256};
use eyre::{Result, WrapErr};
use randao_relay::{fetch_verified_header, AlloyChainClient, ConsensusEra, EraSchedule};
use url::Url;

async fn check(
    env: &str,
    schedule: EraSchedule,
    number: u64,
    era: ConsensusEra,
    hash: B256,
    randao: B256,
) -> Result<()> {
    reth_tracing::init_test_tracing();
    let url: Url = std::env::var(env).wrap_err_with(|| format!("{env} is not set"))?.parse()?;
    let client = AlloyChainClient::connect(&url).await?;

    let header = fetch_verified_header(&client, &schedule, number).await?;
    assert_eq!(header.era, era);
    assert_eq!(header.hash, hash);
    assert_eq!(header.randao(), randao);
    Ok(())
}

#[tokio::test]
#[ignore = "needs RANDAO_RELAY_SEPOLIA_RPC"]
async fn sepolia_block_5_800_000() -> Result<()> {
    check(
        "RANDAO_RELAY_SEPOLIA_RPC",
        EraSchedule::SEPOLIA,
        5_800_000,
        ConsensusEra::Cancun,
        b256!("0x4d6a121cdf8f179e5e39c9d655db44ab09f3cb4fa2e7fa3115a82c2d26087dbb"),
        b256!("0xb037651659a55626fb7daff00d16eb011ec0c6fd7a6c395f8e75421b90ec77b3"),
    )
    .await
}

#[tokio::test]
#[ignore = "needs RANDAO_RELAY_MAINNET_RPC"]
async fn mainnet_block_19_800_000() -> Result<()> {
    check(
        "RANDAO_RELAY_MAINNET_RPC",
        EraSchedule::MAINNET,
        19_800_000,
        ConsensusEra::Cancun,
        b256!("0x95d7f597b43f97bb4dcb0f1d9a74f13d6d6236592cd01d122945d04b5a2aabad"),
        b256!("0xb50774a2180b910c41018b5651e87200c3d10c7b7cd0443b20e346b3f289b66a"),
    )
    .await
}
