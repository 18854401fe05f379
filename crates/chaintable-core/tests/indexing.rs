//! End-to-end pipeline scenarios over an in-memory chain and table store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use chaintable_core::balance::{balance_partition, WalletRule, WalletRuleSet};
use chaintable_core::chain::{BlockRepository, ChainView};
use chaintable_core::index_loop::{IndexLoop, IndexLoopEvent};
use chaintable_core::indexer::{IndexerBuilder, IndexerConfig};
use chaintable_core::store::{MemoryTableStore, RowRange, TableStore};
use chaintable_core::testnet::{self, TestNet};
use chaintable_core::types::Height;

fn config_to(to: Height) -> IndexerConfig {
    IndexerBuilder::new()
        .to_height(to)
        .batch_size(10)
        .checkpoint_interval(7)
        .build()
        .unwrap()
}

async fn run_to_completion(
    config: IndexerConfig,
    net: &TestNet,
    store: Arc<MemoryTableStore>,
    rules: Arc<WalletRuleSet>,
) -> IndexLoop {
    let mut index_loop = IndexLoop::new(
        config,
        net.chain.clone(),
        net.repository.clone(),
        store,
        rules,
        CancellationToken::new(),
    )
    .unwrap();
    index_loop.run().await.unwrap();
    index_loop
}

#[tokio::test]
async fn full_range_produces_all_entity_families() {
    let net = TestNet::simple_chain(99);
    let store = Arc::new(MemoryTableStore::new());
    let index_loop = run_to_completion(
        config_to(99),
        &net,
        store.clone(),
        Arc::new(WalletRuleSet::new()),
    )
    .await;

    // One block row and one tx row per block (each fixture block carries one
    // coinbase), one balance row per (script, tx).
    assert_eq!(store.row_count("blocks"), 100);
    assert_eq!(store.row_count("transactions"), 100);
    assert_eq!(store.row_count("balances"), 100);
    // Empty rule set: no wallet rows, but the stream still reaches the tip.
    assert_eq!(store.row_count("wallets"), 0);

    let status = index_loop.status();
    assert_eq!(status.store_tip, Some(99));
    for stream in status.streams {
        assert_eq!(stream.height, Some(99));
    }
}

#[tokio::test]
async fn store_tip_is_monotonic_across_batches() {
    let net = TestNet::simple_chain(49);
    let store = Arc::new(MemoryTableStore::new());
    let mut index_loop = IndexLoop::new(
        config_to(49),
        net.chain.clone(),
        net.repository.clone(),
        store,
        Arc::new(WalletRuleSet::new()),
        CancellationToken::new(),
    )
    .unwrap();
    let mut events = index_loop.subscribe();
    index_loop.run().await.unwrap();

    let mut last: Option<Height> = None;
    while let Ok(event) = events.try_recv() {
        if let IndexLoopEvent::BatchCompleted { store_tip } = event {
            if let (Some(prev), Some(next)) = (last, store_tip) {
                assert!(next >= prev, "store tip regressed: {prev} -> {next}");
            }
            last = store_tip.or(last);
        }
    }
    assert_eq!(last, Some(49));
}

#[tokio::test]
async fn restart_matches_clean_run() {
    let net = TestNet::simple_chain(59);

    // Interrupted run: cancel after the first completed batch.
    let interrupted = Arc::new(MemoryTableStore::new());
    let cancel = CancellationToken::new();
    let mut first = IndexLoop::new(
        config_to(59),
        net.chain.clone(),
        net.repository.clone(),
        interrupted.clone(),
        Arc::new(WalletRuleSet::new()),
        cancel.clone(),
    )
    .unwrap();
    let mut events = first.subscribe();
    let handle = tokio::spawn(async move {
        first.run().await.unwrap();
    });
    // Wait for one batch, then "kill the process".
    loop {
        match events.recv().await.expect("loop produces events") {
            IndexLoopEvent::BatchCompleted { .. } => break,
            _ => continue,
        }
    }
    cancel.cancel();
    handle.await.unwrap();

    // Restart with the same configuration against the same store.
    let net_again = TestNet::simple_chain(59);
    run_to_completion(
        config_to(59),
        &net_again,
        interrupted.clone(),
        Arc::new(WalletRuleSet::new()),
    )
    .await;

    // A clean run over the same inputs.
    let clean = Arc::new(MemoryTableStore::new());
    run_to_completion(config_to(59), &net_again, clean.clone(), Arc::new(WalletRuleSet::new()))
        .await;

    for table in ["blocks", "transactions", "balances", "wallets"] {
        assert_eq!(
            interrupted.snapshot(table),
            clean.snapshot(table),
            "table {table} diverged after restart"
        );
    }
}

#[tokio::test]
async fn wallet_rules_partition_matching_changes() {
    let watched = testnet::script(0xaa);
    let other = testnet::script(0x01);

    // 12 blocks; the watched script is touched in exactly 3 transactions.
    let mut blocks = Vec::new();
    for height in 0..12u32 {
        let to = if height % 4 == 1 { watched.clone() } else { other.clone() };
        blocks.push(vec![testnet::coinbase(height, to, 50)]);
    }
    let net = TestNet::with_blocks(blocks);

    let mut rules = WalletRuleSet::new();
    rules.add_rule(WalletRule::new("rule_a").with_script(watched.clone()));

    let store = Arc::new(MemoryTableStore::new());
    run_to_completion(config_to(11), &net, store.clone(), Arc::new(rules)).await;

    let wallet_rows = store.scan("wallets", "rule_a", RowRange::all()).await.unwrap();
    assert_eq!(wallet_rows.len(), 3);
    assert!(wallet_rows
        .iter()
        .all(|row| row.payload["wallet_id"] == "rule_a"));

    // The balances table still carries every touched script.
    assert_eq!(store.row_count("balances"), 12);
    let watched_rows = store
        .scan("balances", &balance_partition(&watched), RowRange::all())
        .await
        .unwrap();
    assert_eq!(watched_rows.len(), 3);
}

#[tokio::test]
async fn balance_rows_scan_in_chronological_order() {
    let target = testnet::script(0x42);
    // The target script receives in several blocks, twice within one block.
    let blocks = vec![
        vec![testnet::coinbase(0, target.clone(), 10)],
        vec![
            testnet::coinbase(100, target.clone(), 20),
            testnet::coinbase(101, target.clone(), 30),
        ],
        vec![testnet::coinbase(200, testnet::script(9), 40)],
        vec![testnet::coinbase(300, target.clone(), 50)],
    ];
    let net = TestNet::with_blocks(blocks);
    let store = Arc::new(MemoryTableStore::new());
    run_to_completion(config_to(3), &net, store.clone(), Arc::new(WalletRuleSet::new())).await;

    let rows = store
        .scan("balances", &balance_partition(&target), RowRange::all())
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);

    let ordering: Vec<(u64, u64)> = rows
        .iter()
        .map(|row| {
            (
                row.payload["height"].as_u64().unwrap(),
                row.payload["tx_index"].as_u64().unwrap(),
            )
        })
        .collect();
    let mut sorted = ordering.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(ordering, sorted, "rows out of order or duplicated");
    assert_eq!(ordering, vec![(0, 0), (1, 0), (1, 1), (3, 0)]);
}

#[tokio::test]
async fn replay_is_byte_identical() {
    let net = TestNet::simple_chain(39);
    let store = Arc::new(MemoryTableStore::new());
    run_to_completion(config_to(39), &net, store.clone(), Arc::new(WalletRuleSet::new())).await;
    let before: Vec<String> = ["blocks", "transactions", "balances", "wallets"]
        .iter()
        .map(|t| store.snapshot(t))
        .collect();

    // Force a full re-process of the same range over the same store.
    let replay_config = IndexerBuilder::new()
        .to_height(39)
        .batch_size(10)
        .checkpoint_interval(7)
        .ignore_checkpoints(true)
        .build()
        .unwrap();
    run_to_completion(replay_config, &net, store.clone(), Arc::new(WalletRuleSet::new())).await;

    let after: Vec<String> = ["blocks", "transactions", "balances", "wallets"]
        .iter()
        .map(|t| store.snapshot(t))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn ignore_checkpoints_starts_at_from_height_and_saves_nothing() {
    let net = TestNet::simple_chain(60);
    let store = Arc::new(MemoryTableStore::new());

    // First run leaves real checkpoints at height 50.
    run_to_completion(config_to(50), &net, store.clone(), Arc::new(WalletRuleSet::new())).await;
    let checkpoints_before = store.snapshot("checkpoints");

    // ignore_checkpoints with from_height 20: processing restarts at 20.
    let fresh = Arc::new(MemoryTableStore::new());
    let config = IndexerBuilder::new()
        .from_height(20)
        .to_height(60)
        .batch_size(10)
        .ignore_checkpoints(true)
        .build()
        .unwrap();
    run_to_completion(config.clone(), &net, fresh.clone(), Arc::new(WalletRuleSet::new())).await;
    assert_eq!(fresh.row_count("blocks"), 41); // heights 20..=60
    assert_eq!(fresh.snapshot("checkpoints"), "[]");

    // Same config against the store holding height-50 checkpoints: they are
    // neither read nor overwritten.
    run_to_completion(config, &net, store.clone(), Arc::new(WalletRuleSet::new())).await;
    assert_eq!(store.snapshot("checkpoints"), checkpoints_before);
}

#[tokio::test(flavor = "multi_thread")]
async fn repository_gap_stalls_then_recovers() {
    let net = TestNet::simple_chain(45);
    net.repository.remove(&testnet::block_hash(42));

    let store = Arc::new(MemoryTableStore::new());
    let cancel = CancellationToken::new();
    let mut index_loop = IndexLoop::new(
        config_to(45),
        net.chain.clone(),
        net.repository.clone(),
        store.clone(),
        Arc::new(WalletRuleSet::new()),
        cancel.clone(),
    )
    .unwrap();
    let mut events = index_loop.subscribe();
    let handle = tokio::spawn(async move { index_loop.run().await });

    // The loop reaches the gap and stalls at height 41.
    let mut stalled_at = None;
    while let Some(event) = events.recv().await {
        if let IndexLoopEvent::BatchCompleted { store_tip } = event {
            if store_tip == Some(41) {
                stalled_at = store_tip;
                break;
            }
        }
    }
    assert_eq!(stalled_at, Some(41));
    assert_eq!(store.row_count("blocks"), 42); // heights 0..=41

    // The repository catches up; the next batch retries from 42.
    let replacement = TestNet::simple_chain(45);
    let block = replacement
        .repository
        .block(&testnet::block_hash(42))
        .await
        .unwrap()
        .unwrap();
    net.repository.insert(block);

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("loop finishes after gap heals")
        .unwrap()
        .unwrap();
    assert_eq!(store.row_count("blocks"), 46);
}

#[tokio::test]
async fn worker_count_does_not_change_final_state() {
    let net = TestNet::simple_chain(80);

    let serial_store = Arc::new(MemoryTableStore::new());
    let serial = IndexerBuilder::new()
        .to_height(80)
        .batch_size(20)
        .scheduler_limits(1, 1)
        .build()
        .unwrap();
    run_to_completion(serial, &net, serial_store.clone(), Arc::new(WalletRuleSet::new())).await;

    let parallel_store = Arc::new(MemoryTableStore::new());
    let parallel = IndexerBuilder::new()
        .to_height(80)
        .batch_size(20)
        .scheduler_limits(30, 100)
        .build()
        .unwrap();
    run_to_completion(parallel, &net, parallel_store.clone(), Arc::new(WalletRuleSet::new()))
        .await;

    for table in ["blocks", "transactions", "balances", "wallets"] {
        assert_eq!(serial_store.snapshot(table), parallel_store.snapshot(table));
    }
}

#[tokio::test]
async fn empty_wallet_rules_advance_checkpoint_without_rows() {
    let net = TestNet::simple_chain(30);
    let store = Arc::new(MemoryTableStore::new());
    let index_loop = run_to_completion(
        config_to(30),
        &net,
        store.clone(),
        Arc::new(WalletRuleSet::new()),
    )
    .await;

    assert_eq!(store.row_count("wallets"), 0);
    let wallets = index_loop
        .status()
        .streams
        .into_iter()
        .find(|stream| stream.kind == chaintable_core::checkpoint::StreamKind::Wallets)
        .unwrap();
    assert_eq!(wallets.height, Some(30));
}

#[tokio::test]
async fn chain_sync_loop_fills_chain_table() {
    let net = TestNet::simple_chain(25);
    let store = Arc::new(MemoryTableStore::new());
    let sync = chaintable_core::chain_sync::ChainSyncLoop::new(
        &IndexerConfig::default(),
        net.chain.clone(),
        store.clone(),
        CancellationToken::new(),
    );
    store.create_table_if_absent("chain").await.unwrap();
    store.create_table_if_absent("checkpoints").await.unwrap();
    assert_eq!(sync.sync_once().await.unwrap(), 26);

    let rows = store.scan("chain", "headers", RowRange::all()).await.unwrap();
    assert_eq!(rows.len(), 26);
    // Rows are height-ordered and linked.
    for (i, row) in rows.iter().enumerate().skip(1) {
        assert_eq!(row.payload["prev_hash"], rows[i - 1].payload["hash"]);
    }

    // Find-fork on the persisted locator resolves to the chain tip.
    let chain: Arc<dyn ChainView> = net.chain.clone();
    assert_eq!(chain.tip().height, 25);
}
