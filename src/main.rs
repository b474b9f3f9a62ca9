//! Main entry point for the candy-mint client
//!
//! With `MINT_CATALOG` set this reads a live candy machine and, given
//! `MINT_KEYPAIR`, mints from it (`candy-mint mint <quantity>`). Otherwise it
//! runs a demo sale on the simulated chain.

use anyhow::{anyhow, Context, Result};
use candy_mint::chain::{LiveCatalog, RpcChain, SimulatedChain};
use candy_mint::eligibility::{AllowListTable, AllowListTables};
use candy_mint::format::{format_duration, format_sol, short_pubkey};
use candy_mint::mint::{BatchOutcome, MintConfig, MintConfigBuilder, MintSession, SessionSources};
use candy_mint::types::{
    AllowListGuard, GuardGroup, MintLimit, OwnershipSnapshot, Pubkey, SaleState, SolPayment,
    TokenStandard,
};
use chrono::{Duration as ChronoDuration, Utc};
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config = MintConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match config.catalog_path.clone() {
        Some(catalog) => run_live(config, &catalog, &args).await,
        None => run_demo(config).await,
    }
}

/// Read a live candy machine; mint when a keypair is configured.
async fn run_live(config: MintConfig, catalog: &str, args: &[String]) -> Result<()> {
    info!("Starting candy-mint on {}", config.network);

    let wallet = match &config.keypair_path {
        Some(path) => Some(Arc::new(
            read_keypair_file(path).map_err(|e| anyhow!("Failed to read keypair {}: {}", path, e))?,
        )),
        None => {
            warn!("No keypair configured, showing the sale read-only");
            None
        }
    };
    let allow_lists = Arc::new(AllowListTables::from_json_files(&config.allow_list_paths)?);

    let chain = Arc::new(RpcChain::new(Arc::new(config.clone()))?);
    let catalog = Arc::new(LiveCatalog::new(catalog, chain.clone()));
    let sources = SessionSources::from_chain(chain, catalog);
    let session = Arc::new(MintSession::new(config, sources, allow_lists, wallet));

    session.refresh().await.context("Initial refresh failed")?;
    print_groups(&session).await;

    if args.first().map(String::as_str) == Some("mint") {
        let quantity: u32 = match args.get(1) {
            Some(q) => q.parse().context("Quantity must be a number")?,
            None => 1,
        };
        let now = Utc::now();
        let applied = session.set_mint_multiplier(quantity, now).await;
        if applied != quantity {
            warn!("Quantity clamped from {} to {}", quantity, applied);
        }
        // Returns after the post-batch refresh, so the groups below are current
        let outcome = session.mint(now).await?;
        report_outcome(&session, &outcome);
        print_groups(&session).await;
    }

    Ok(())
}

/// Demo sale: an OG allow-list phase followed by a public phase.
async fn run_demo(config: MintConfig) -> Result<()> {
    info!("Starting candy-mint demo on the simulated chain");

    let wallet = Keypair::new();
    let now = Utc::now();

    let mut og_members: Vec<String> = (0..7).map(|_| Pubkey::new_unique().to_string()).collect();
    og_members.push(wallet.pubkey().to_string());
    let og = AllowListTable::new("og", og_members);
    let og_root = og.root();
    let allow_lists = Arc::new(AllowListTables::new(vec![og]));

    let treasury = Pubkey::new_unique();
    let mut og_group = GuardGroup::new("OG");
    og_group.start_time = Some(now - ChronoDuration::minutes(5));
    og_group.end_time = Some(now + ChronoDuration::hours(1));
    og_group.allow_list = Some(AllowListGuard { merkle_root: og_root });
    og_group.mint_limit = Some(MintLimit {
        id: 1,
        limit: 3,
        minted: None,
    });
    og_group.sol_payment = Some(SolPayment {
        price: 0.5,
        destination: treasury,
    });

    let mut public_group = GuardGroup::new("public");
    public_group.start_time = Some(now + ChronoDuration::hours(1));
    public_group.sol_payment = Some(SolPayment {
        price: 1.0,
        destination: treasury,
    });

    let sale = SaleState {
        candy_machine: Pubkey::new_unique(),
        candy_guard: Pubkey::new_unique(),
        collection_mint: Pubkey::new_unique(),
        collection_update_authority: Pubkey::new_unique(),
        token_standard: TokenStandard::NonFungible,
        items_available: 100,
        items_minted: 42,
        groups: vec![og_group, public_group],
    };
    let mut snapshot = OwnershipSnapshot::empty(wallet.pubkey());
    snapshot.sol_balance = 3.0;

    let chain = Arc::new(
        SimulatedChain::new(sale, snapshot)
            .with_failure_rate(0.25)
            .with_confirm_delay(Duration::from_millis(300), Duration::from_millis(1200)),
    );
    let sources = SessionSources::from_chain(chain.clone(), chain.clone());

    let config = MintConfigBuilder::new()
        .with_network(config.network)
        .with_refresh_interval(5)
        .build_config();
    let session = Arc::new(MintSession::new(config, sources, allow_lists, Some(Arc::new(wallet))));
    let scheduler = session.spawn_auto_refresh();

    session.refresh().await?;
    print_groups(&session).await;

    let now = Utc::now();
    let quantity = session.set_mint_multiplier(3, now).await;
    info!("Minting {} with max {}", quantity, session.max_mintable(now).await);

    let outcome = session.mint(now).await?;
    report_outcome(&session, &outcome);

    // Let the delayed refresh pick up the new holdings
    tokio::time::sleep(Duration::from_secs(2)).await;
    for nft in session.my_collection_minted().await {
        info!("Owned: {} ({})", nft.name, short_pubkey(&nft.mint));
    }
    print_groups(&session).await;

    scheduler.shutdown().await;
    info!("Demo completed after {} endpoint switch(es)", chain.endpoint_switches());
    Ok(())
}

async fn print_groups(session: &MintSession) {
    let now = Utc::now();
    let Some(view) = session.view().await else {
        warn!("No sale state loaded");
        return;
    };
    info!(
        "{} of {} minted, fee {} SOL per unit",
        view.sale.items_minted,
        view.sale.items_available,
        format_sol(view.sale.mint_fee())
    );
    if let Some(snapshot) = &view.snapshot {
        info!(
            "Wallet {} holds {} SOL",
            short_pubkey(&snapshot.address),
            format_sol(snapshot.sol_balance)
        );
    }

    for report in session.group_reports(now).await {
        let group = view.sale.group(&report.label);
        let opens_in = group
            .and_then(|g| g.start_time)
            .map(|start| (start - now).num_seconds())
            .filter(|secs| *secs > 0);
        let failing: Vec<&str> = report
            .eligibility
            .failing()
            .iter()
            .map(|c| c.as_str())
            .collect();

        match opens_in {
            Some(secs) => info!("[{}] opens in {}", report.label, format_duration(secs)),
            None if failing.is_empty() => info!(
                "[{}] eligible, up to {} per batch",
                report.label, report.max_mintable
            ),
            None => info!("[{}] not eligible: {}", report.label, failing.join(", ")),
        }
    }
}

fn report_outcome(session: &MintSession, outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Settled(report) => info!(
            "Batch settled: {} succeeded, {} failed",
            report.status.succeeded, report.status.failed
        ),
        BatchOutcome::Aborted(err) => warn!("Batch aborted: {}", err),
    }
    if let Some(view) = session.status().current() {
        info!("Status: {}", view.message.text);
    }
}
