//! Tests for mint batches driven through the session

mod common;

use candy_mint::eligibility::{AllowListTable, AllowListTables};
use candy_mint::mint::{
    BatchOutcome, MintConfigBuilder, MintError, MintSession, SessionSources, Severity,
};
use candy_mint::types::AllowListGuard;
use chrono::Utc;
use common::{funded_snapshot, paid_group, sale_with, ScriptedChain};
use solana_sdk::signature::{Keypair, Signer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn session_for(
    chain: &Arc<ScriptedChain>,
    wallet: Keypair,
    allow_lists: AllowListTables,
) -> Arc<MintSession> {
    let sources = SessionSources::from_chain(chain.clone(), chain.clone());
    let config = MintConfigBuilder::new().with_network("devnet").build_config();
    Arc::new(MintSession::new(
        config,
        sources,
        Arc::new(allow_lists),
        Some(Arc::new(wallet)),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_reports_success_with_errors() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.fail_sends(&[1, 3]);
    let session = session_for(&chain, wallet, AllowListTables::default());

    session.refresh().await.unwrap();
    let now = Utc::now();
    assert_eq!(session.set_mint_multiplier(5, now).await, 5);

    let outcome = session.mint(now).await.unwrap();
    let BatchOutcome::Settled(report) = outcome else {
        panic!("batch should settle");
    };
    assert_eq!(report.status.requested, 5);
    assert_eq!(report.status.submitted, 5);
    assert_eq!(report.status.succeeded, 3);
    assert_eq!(report.status.failed, 2);
    assert_eq!(report.status.errors.len(), 2);
    assert_eq!(report.minted.len(), 3);

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Success);
    assert!(view.message.text.starts_with(
        "3 of 5 mints succeded! Your new NFTs shows now under My collection.\nFailed mints:\n"
    ));
    assert_eq!(view.message.text.matches("rejected by scripted chain").count(), 2);

    assert_eq!(session.mint_multiplier(), 1);
    assert_eq!(session.my_collection_minted().await.len(), 3);
    assert!(!session.is_minting());
    // Without a scheduler the session refreshes on its own after the batch
    assert_eq!(chain.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_total_failure_still_refreshes() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.fail_sends(&[0, 1, 2]);
    let session = session_for(&chain, wallet, AllowListTables::default());
    let scheduler = session.spawn_auto_refresh();

    // First tick refreshes immediately
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(chain.fetches(), 1);

    let now = Utc::now();
    assert_eq!(session.set_mint_multiplier(3, now).await, 3);
    let outcome = session.mint(now).await.unwrap();
    assert_eq!(outcome.succeeded(), 0);

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Error);
    assert!(view.message.text.starts_with("All mints failed!\n"));
    assert_eq!(view.message.text.matches("rejected by scripted chain").count(), 3);
    assert!(session.is_auto_refresh_paused());

    // Resumes one second after the batch settles
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!session.is_auto_refresh_paused());
    assert_eq!(chain.fetches(), 2);
    // Nothing minted, so the quantity is kept
    assert_eq!(session.mint_multiplier(), 3);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_allow_list_proof_registered_once() {
    let wallet = Keypair::new();
    let table = AllowListTable::new(
        "og",
        vec![
            wallet.pubkey().to_string(),
            solana_sdk::pubkey::Pubkey::new_unique().to_string(),
            solana_sdk::pubkey::Pubkey::new_unique().to_string(),
        ],
    );
    let mut group = paid_group("OG", 0.1);
    group.allow_list = Some(AllowListGuard {
        merkle_root: table.root(),
    });
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![group]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    let session = session_for(&chain, wallet, AllowListTables::new(vec![table]));
    session.refresh().await.unwrap();

    let first = session.mint(Utc::now()).await.unwrap();
    assert_eq!(first.succeeded(), 1);
    assert_eq!(chain.route_sends.load(Ordering::SeqCst), 1);

    let second = session.mint(Utc::now()).await.unwrap();
    assert_eq!(second.succeeded(), 1);
    assert_eq!(chain.route_sends.load(Ordering::SeqCst), 1);
    assert_eq!(chain.mint_sends.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_setup_failure_aborts_and_resumes() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.fail_blockhash.store(true, Ordering::SeqCst);
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();

    let outcome = session.mint(Utc::now()).await.unwrap();
    assert!(matches!(outcome, BatchOutcome::Aborted(MintError::Setup(_))));
    assert_eq!(chain.mint_sends.load(Ordering::SeqCst), 0);

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Error);
    assert!(view.message.text.starts_with("Failed to mint: "));
    assert!(view.message.auto_dismiss);
    assert!(!session.is_auto_refresh_paused());
    assert_eq!(chain.fetches(), 2);
}

#[tokio::test]
async fn test_ineligible_wallet_is_rejected_before_submission() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 1.0)]),
        funded_snapshot(wallet.pubkey(), 0.5),
    ));
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();

    let err = session.mint(Utc::now()).await.unwrap_err();
    assert!(matches!(err, MintError::NotEligible { .. }));
    assert_eq!(chain.mint_sends.load(Ordering::SeqCst), 0);
    assert!(!session.is_minting());

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Error);
    assert!(view.message.text.starts_with("Failed to mint: Wallet cannot mint 1"));
    assert!(view.message.auto_dismiss);
}

#[tokio::test]
async fn test_no_open_group_is_reported() {
    let wallet = Keypair::new();
    let mut ended = paid_group("public", 0.1);
    ended.end_time = Some(Utc::now() - chrono::Duration::minutes(1));
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![ended]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();

    let err = session.mint(Utc::now()).await.unwrap_err();
    assert!(matches!(err, MintError::NoActiveGroup));

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Error);
    assert_eq!(
        view.message.text,
        "Failed to mint: No guard group is open for minting"
    );
}

#[tokio::test]
async fn test_mint_requires_loaded_view() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    let session = session_for(&chain, wallet, AllowListTables::default());

    assert!(matches!(
        session.mint(Utc::now()).await,
        Err(MintError::NotReady)
    ));
    let view = session.status().current().unwrap();
    assert!(view.message.text.starts_with("Failed to mint: "));
}

#[tokio::test]
async fn test_refresh_failure_rotates_endpoint_and_keeps_view() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();
    let before = session.view().await.unwrap();

    chain.fail_catalog.store(true, Ordering::SeqCst);
    assert!(session.refresh().await.is_err());
    assert_eq!(chain.endpoint_picks.load(Ordering::SeqCst), 1);

    let after = session.view().await.unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(!session.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_stays_paused_for_back_to_back_batches() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    let session = session_for(&chain, wallet, AllowListTables::default());
    let scheduler = session.spawn_auto_refresh();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(chain.fetches(), 1);

    let first = session.mint(Utc::now()).await.unwrap();
    assert_eq!(first.succeeded(), 1);

    // The second batch starts before the first one's delayed resume fires
    chain.delay_confirm(1, Duration::from_secs(5));
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.mint(Utc::now()).await }
    });

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(session.is_minting());
    assert!(session.is_auto_refresh_paused());
    assert_eq!(chain.fetches(), 1);

    let outcome = second.await.unwrap().unwrap();
    assert_eq!(outcome.succeeded(), 1);
    assert!(session.is_auto_refresh_paused());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!session.is_auto_refresh_paused());
    assert_eq!(chain.fetches(), 2);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_confirmation_counts_as_failed_unit() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.fail_confirms(&[1]);
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();
    session.set_mint_multiplier(3, Utc::now()).await;

    let BatchOutcome::Settled(report) = session.mint(Utc::now()).await.unwrap() else {
        panic!("batch should settle");
    };
    assert_eq!(report.status.submitted, 3);
    assert_eq!(report.status.succeeded, 2);
    assert_eq!(report.status.failed, 1);
    assert_eq!(report.minted.len(), 2);
    assert_eq!(chain.mint_sends.load(Ordering::SeqCst), 3);

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Success);
    assert!(view.message.text.starts_with("2 of 3 mints succeded!"));
    assert!(view
        .message
        .text
        .contains("block height exceeded before confirmation"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_confirmation_does_not_block_other_units() {
    let wallet = Keypair::new();
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![paid_group("public", 0.1)]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.delay_confirm(0, Duration::from_secs(30));
    let session = session_for(&chain, wallet, AllowListTables::default());
    session.refresh().await.unwrap();
    session.set_mint_multiplier(3, Utc::now()).await;

    let batch = tokio::spawn({
        let session = session.clone();
        async move { session.mint(Utc::now()).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = session.batch_status().await.unwrap();
    assert_eq!(status.submitted, 3);
    assert_eq!(status.succeeded, 2);
    assert!(session.is_minting());

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Info);
    assert!(view.message.text.starts_with("2 of 3 mints succeded!"));
    assert!(view.message.progress.unwrap() > 0.6);

    let outcome = batch.await.unwrap().unwrap();
    assert_eq!(outcome.succeeded(), 3);
}

#[tokio::test]
async fn test_failed_proof_registration_aborts_batch() {
    let wallet = Keypair::new();
    let table = AllowListTable::new(
        "og",
        vec![
            wallet.pubkey().to_string(),
            solana_sdk::pubkey::Pubkey::new_unique().to_string(),
        ],
    );
    let mut group = paid_group("OG", 0.1);
    group.allow_list = Some(AllowListGuard {
        merkle_root: table.root(),
    });
    let chain = Arc::new(ScriptedChain::new(
        sale_with(vec![group]),
        funded_snapshot(wallet.pubkey(), 10.0),
    ));
    chain.fail_route.store(true, Ordering::SeqCst);
    let session = session_for(&chain, wallet, AllowListTables::new(vec![table]));
    session.refresh().await.unwrap();

    let outcome = session.mint(Utc::now()).await.unwrap();
    assert!(matches!(outcome, BatchOutcome::Aborted(MintError::Preflight(_))));
    assert_eq!(chain.route_sends.load(Ordering::SeqCst), 1);
    assert_eq!(chain.mint_sends.load(Ordering::SeqCst), 0);
    assert!(!chain.proof_registered.load(Ordering::SeqCst));

    let view = session.status().current().unwrap();
    assert_eq!(view.message.severity, Severity::Error);
    assert!(view
        .message
        .text
        .starts_with("Failed to mint: Could not register the allow list proof"));
    assert!(!session.is_auto_refresh_paused());
}
