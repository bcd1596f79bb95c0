//! End-to-end duel flows through the assembled service
//!
//! Drives the state machine directly and runs dispatcher cycles by hand, so
//! every deferred side effect is observable in the in-memory gateway.

use duelgate::config::ServerEntry;
use duelgate::duels::{DuelError, DuelStatus, NewChallenge, QueueOutcome, ResultOutcome};
use duelgate::games::GameKind;
use duelgate::notify::Gateway;
use duelgate::servers::AllocationError;
use duelgate::settlement::PayoutStatus;
use duelgate::tasks::{
    CycleOutcome, CycleReport, InMemoryTaskStore, RocksTaskStore, SettlePayout, TaskPayload,
    TaskStore, TaskType,
};
use duelgate::{App, DuelgateConfig, Stores};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const ALICE_WALLET: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

fn test_config() -> DuelgateConfig {
    let mut config = DuelgateConfig::default();
    config.servers.pool = vec![
        ServerEntry {
            game: GameKind::Arena,
            region: "eu".to_string(),
            link: "https://play.example/arena/eu-1".to_string(),
        },
        ServerEntry {
            game: GameKind::Sumo,
            region: "na".to_string(),
            link: "https://play.example/sumo/na-1".to_string(),
        },
    ];
    config
}

fn settlement_config() -> DuelgateConfig {
    let mut config = test_config();
    config.settlement.enabled = true;
    config.settlement.auto_payout = true;
    config.settlement.signer_key = Some("operator-signer".to_string());
    config
}

async fn app_with(config: DuelgateConfig) -> App {
    let app = App::with_task_store(config, Arc::new(InMemoryTaskStore::new()));
    for (participant, username) in [("alice", "AliceGG"), ("bob", "BobTheBuilder")] {
        app.identities
            .link_account(participant, GameKind::Arena, username)
            .await
            .unwrap();
        app.ledger.deposit(participant, 1_000).unwrap();
    }
    app
}

fn challenge(wager: u64) -> NewChallenge {
    NewChallenge {
        challenger_id: "alice".to_string(),
        opponent_id: "bob".to_string(),
        game: GameKind::Arena,
        wager,
        match_parameters: json!({ "map": "foundry", "region": "eu" }),
    }
}

async fn cycle(app: &App) -> CycleReport {
    match app.dispatcher.run_cycle().await.unwrap() {
        CycleOutcome::Ran(report) => report,
        CycleOutcome::Skipped => panic!("no other cycle should be running"),
    }
}

/// Run cycles until nothing is pending
async fn drain(app: &App) {
    for _ in 0..10 {
        if app.tasks.fetch_pending(1).await.unwrap().is_empty() {
            return;
        }
        cycle(app).await;
    }
    panic!("tasks still pending after 10 cycles");
}

/// Challenge, accept, start and hand the job to the referee
async fn duel_in_play(app: &App, wager: u64) -> String {
    let duel = app.duels.create_challenge(challenge(wager)).await.unwrap();
    app.duels.accept(&duel.id, "bob").await.unwrap();
    app.duels.start(&duel.id, "bob").await.unwrap();
    drain(app).await;
    duel.id
}

#[tokio::test]
async fn test_hundred_wager_duel_pays_winner() {
    let app = app_with(test_config()).await;
    let duel = app.duels.create_challenge(challenge(100)).await.unwrap();
    drain(&app).await;
    assert_eq!(app.gateway.dms_to("bob").len(), 1);

    app.duels.accept(&duel.id, "bob").await.unwrap();
    assert_eq!(app.ledger.balance("alice"), 900);
    assert_eq!(app.ledger.balance("bob"), 900);

    app.duels.start(&duel.id, "bob").await.unwrap();
    drain(&app).await;

    let jobs = app.referee_queue.take(Some(GameKind::Arena), 10).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].challenger_username, "AliceGG");
    assert_eq!(jobs[0].server_link, "https://play.example/arena/eu-1");
    assert_eq!(
        app.duels.get(&duel.id).await.unwrap().status,
        DuelStatus::AwaitingResult
    );

    let outcome = app
        .duels
        .ingest_result(&duel.id, &json!({ "winner": "AliceGG", "scores": { "alice": 10, "bob": 7 } }))
        .await
        .unwrap();
    assert!(matches!(outcome, ResultOutcome::Resolved(_)));
    drain(&app).await;

    let posts = app.gateway.messages("duel-results");
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("<@alice> beat <@bob>"));
    assert!(posts[0].contains("200 pot"));

    app.duels.confirm(&duel.id, "bob").await.unwrap();
    assert_eq!(app.ledger.balance("alice"), 1_100);
    assert_eq!(app.ledger.balance("bob"), 900);
}

#[tokio::test]
async fn test_typo_in_reported_winner_needs_review() {
    let app = app_with(test_config()).await;
    let duel_id = duel_in_play(&app, 100).await;

    let outcome = app
        .duels
        .ingest_result(&duel_id, &json!({ "winner": "AIiceGG" }))
        .await
        .unwrap();
    let duel = match outcome {
        ResultOutcome::Unresolved(duel) => duel,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(duel.status, DuelStatus::AwaitingResult);
    assert!(duel.review_note.is_some());
    assert!(duel.winner_id.is_none());

    drain(&app).await;
    assert!(app.gateway.messages("duel-results").is_empty());
    assert_eq!(app.ledger.balance("alice") + app.ledger.balance("bob"), 1_800);

    // admin settles it by hand
    app.duels.resolve(&duel_id, "alice").await.unwrap();
    assert_eq!(app.ledger.balance("alice"), 1_100);
    drain(&app).await;
    assert_eq!(app.gateway.messages("duel-results").len(), 1);
}

#[tokio::test]
async fn test_dispute_keeps_pot_frozen_and_opens_ticket() {
    let app = app_with(test_config()).await;
    let duel_id = duel_in_play(&app, 250).await;
    app.duels
        .ingest_result(&duel_id, &json!({ "winner": "BobTheBuilder" }))
        .await
        .unwrap();

    app.duels
        .dispute(&duel_id, "alice", "He left the arena bounds", true)
        .await
        .unwrap();
    drain(&app).await;

    assert_eq!(app.ledger.balance("bob"), 750);
    assert_eq!(app.ledger.balance("alice"), 750);
    let ticket = app
        .gateway
        .find_channel(&format!("ticket-dispute-{}", duel_id))
        .await
        .unwrap()
        .expect("dispute ticket channel");
    assert_eq!(app.gateway.members(&ticket), Some(vec!["alice".to_string()]));
    assert!(app.gateway.messages(&ticket)[0].contains("video evidence available"));

    let late_confirm = app.duels.confirm(&duel_id, "bob").await.unwrap();
    assert!(!late_confirm.is_applied());

    app.duels.void(&duel_id, "Both players disqualified").await.unwrap();
    assert_eq!(app.ledger.balance("alice"), 1_000);
    assert_eq!(app.ledger.balance("bob"), 1_000);
}

#[tokio::test]
async fn test_concurrent_confirm_and_void_settle_once() {
    let app = Arc::new(app_with(test_config()).await);
    let duel_id = duel_in_play(&app, 100).await;
    app.duels
        .ingest_result(&duel_id, &json!({ "winner": "AliceGG" }))
        .await
        .unwrap();

    let confirm = {
        let app = app.clone();
        let id = duel_id.clone();
        tokio::spawn(async move { app.duels.confirm(&id, "alice").await })
    };
    let void = {
        let app = app.clone();
        let id = duel_id.clone();
        tokio::spawn(async move { app.duels.void(&id, "operator error").await })
    };
    let confirm = confirm.await.unwrap();
    let void = void.await.unwrap();

    let duel = app.duels.get(&duel_id).await.unwrap();
    let total = app.ledger.balance("alice") + app.ledger.balance("bob");
    assert_eq!(total, 2_000);
    match duel.status {
        DuelStatus::Confirmed => {
            assert!(confirm.unwrap().is_applied());
            assert!(void.is_err());
            assert_eq!(app.ledger.balance("alice"), 1_100);
        }
        DuelStatus::Voided => {
            assert!(void.unwrap().is_applied());
            assert!(confirm.is_err());
            assert_eq!(app.ledger.balance("alice"), 1_000);
        }
        other => panic!("unexpected status {}", other),
    }
}

#[tokio::test]
async fn test_rejected_challenge_builds_no_referee_job() {
    let app = app_with(test_config()).await;
    let mut bad = challenge(100);
    bad.match_parameters = json!({ "map": "volcano", "region": "eu" });

    let err = app.duels.create_challenge(bad).await.unwrap_err();
    assert!(err.to_string().contains("Unknown map 'volcano'"));
    assert!(app.tasks.fetch_pending(10).await.unwrap().iter().all(|t| {
        t.task_type() != TaskType::SendDuelChallengeDm && t.task_type() != TaskType::DispatchReferee
    }));
}

#[tokio::test]
async fn test_gateway_outage_is_redelivered_once() {
    let app = app_with(test_config()).await;
    let duel_id = duel_in_play(&app, 100).await;
    app.duels
        .ingest_result(&duel_id, &json!({ "winner": "AliceGG" }))
        .await
        .unwrap();

    app.gateway.fail_next(1);
    let report = cycle(&app).await;
    assert_eq!(report.failed, 1);
    assert!(app.gateway.messages("duel-results").is_empty());

    let report = cycle(&app).await;
    assert_eq!(report.completed, 1);
    let report = cycle(&app).await;
    assert_eq!(report.fetched, 0);
    assert_eq!(app.gateway.messages("duel-results").len(), 1);
}

#[tokio::test]
async fn test_auto_payout_broadcasts_exactly_once() {
    let app = app_with(settlement_config()).await;
    app.identities.set_payout_address("alice", ALICE_WALLET).unwrap();
    let parts = app.settlement.clone().unwrap();

    let duel_id = duel_in_play(&app, 100).await;
    app.duels
        .ingest_result(&duel_id, &json!({ "winner": "AliceGG" }))
        .await
        .unwrap();
    app.duels.confirm(&duel_id, "alice").await.unwrap();
    // pot leaves the platform instead of landing in the internal balance
    assert_eq!(app.ledger.balance("alice"), 900);

    let instruction = SettlePayout {
        duel_id: duel_id.clone(),
        recipient_address: ALICE_WALLET.to_string(),
        amount: Decimal::from(2),
        token: "USDC".to_string(),
    };
    let (first, second) = tokio::join!(
        parts.payouts.settle(&instruction),
        parts.payouts.settle(&instruction)
    );
    assert!(first.is_ok() && second.is_ok());
    drain(&app).await;

    assert_eq!(parts.network.broadcasts().len(), 1);
    let payout = parts.payouts.get(&duel_id).await.unwrap().unwrap();
    assert_eq!(payout.status, PayoutStatus::Broadcast);
    assert!(payout.external_tx_reference.is_some());
}

#[tokio::test]
async fn test_stale_duels_are_refunded() {
    let mut config = test_config();
    config.duels.stale_refund_after_secs = Some(600);
    let app = app_with(config).await;
    let duel_id = duel_in_play(&app, 100).await;

    let later = chrono::Utc::now() + chrono::Duration::minutes(30);
    let voided = app.duels.void_stale(later).await.unwrap();
    assert_eq!(voided, vec![duel_id.clone()]);
    assert_eq!(app.ledger.balance("alice"), 1_000);
    assert_eq!(app.ledger.balance("bob"), 1_000);
}

#[tokio::test]
async fn test_offline_region_is_announced_and_blocks_starts() {
    let app = app_with(test_config()).await;
    let duel = app.duels.create_challenge(challenge(100)).await.unwrap();
    app.duels.accept(&duel.id, "bob").await.unwrap();

    assert!(app.server_board.set_status("eu", "offline", false).await);
    assert!(!app.server_board.set_status("eu", "offline", false).await);
    drain(&app).await;

    assert_eq!(
        app.gateway.channel_name("servers-eu").await.unwrap().as_deref(),
        Some("servers-eu-offline")
    );
    assert_eq!(
        app.gateway.messages("announcements"),
        vec!["Servers in eu are now offline".to_string()]
    );

    let err = app.duels.start(&duel.id, "alice").await.unwrap_err();
    assert!(matches!(
        err,
        DuelError::ServerUnavailable(AllocationError::RegionOffline(_))
    ));
    assert_eq!(
        app.duels.get(&duel.id).await.unwrap().status,
        DuelStatus::Accepted
    );
}

#[tokio::test]
async fn test_quick_match_takes_house_fee() {
    let mut config = test_config();
    config.duels.quick_match_fee_bps = 500;
    let app = app_with(config).await;
    let params = json!({ "map": "docks", "region": "eu" });

    let first = app
        .matchmaker
        .join("alice", GameKind::Arena, 100, params.clone())
        .await
        .unwrap();
    assert_eq!(first, QueueOutcome::Waiting { position: 1 });

    let duel = match app
        .matchmaker
        .join("bob", GameKind::Arena, 100, params)
        .await
        .unwrap()
    {
        QueueOutcome::Matched(duel) => duel,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(duel.status, DuelStatus::Accepted);
    assert_eq!(duel.pot, 190);
    assert_eq!(duel.house_fee, 10);
    assert_eq!(app.ledger.balance("alice"), 900);

    app.duels.start(&duel.id, "alice").await.unwrap();
    drain(&app).await;
    app.duels
        .ingest_result(&duel.id, &json!({ "winner": "BobTheBuilder" }))
        .await
        .unwrap();
    app.duels.confirm(&duel.id, "bob").await.unwrap();

    assert_eq!(app.ledger.balance("bob"), 1_090);
    assert_eq!(app.ledger.balance(duelgate::ledger::HOUSE_ACCOUNT), 10);
}

#[tokio::test]
async fn test_pending_tasks_survive_restart() {
    let dir = TempDir::new().unwrap();

    let duel_id = {
        let store = Arc::new(RocksTaskStore::open(dir.path()).unwrap());
        let app = App::with_task_store(test_config(), store);
        app.identities
            .link_account("alice", GameKind::Arena, "AliceGG")
            .await
            .unwrap();
        app.identities
            .link_account("bob", GameKind::Arena, "BobTheBuilder")
            .await
            .unwrap();
        app.ledger.deposit("alice", 100).unwrap();
        app.ledger.deposit("bob", 100).unwrap();
        app.duels.create_challenge(challenge(100)).await.unwrap().id
    };

    // crash before any dispatch: everything is still there after reopening
    let store = Arc::new(RocksTaskStore::open(dir.path()).unwrap());
    let pending = store.fetch_pending(10).await.unwrap();
    let types: Vec<TaskType> = pending.iter().map(|t| t.task_type()).collect();
    assert_eq!(
        types,
        vec![
            TaskType::SendLinkSuccessDm,
            TaskType::SendLinkSuccessDm,
            TaskType::SendDuelChallengeDm
        ]
    );

    let app = App::with_task_store(test_config(), store.clone());
    drain(&app).await;
    let dms = app.gateway.dms_to("bob");
    assert!(dms.iter().any(|dm| dm.contains(&duel_id)));
    assert!(store.fetch_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payout_redelivered_after_restart_is_not_resent() {
    let dir = TempDir::new().unwrap();

    let duel_id = {
        let app = App::with_stores(
            settlement_config(),
            Stores::rocks(RocksTaskStore::open(dir.path()).unwrap()),
        );
        app.identities
            .link_account("alice", GameKind::Arena, "AliceGG")
            .await
            .unwrap();
        app.identities
            .link_account("bob", GameKind::Arena, "BobTheBuilder")
            .await
            .unwrap();
        app.identities.set_payout_address("alice", ALICE_WALLET).unwrap();
        app.ledger.deposit("alice", 1_000).unwrap();
        app.ledger.deposit("bob", 1_000).unwrap();

        let duel_id = duel_in_play(&app, 100).await;
        app.duels
            .ingest_result(&duel_id, &json!({ "winner": "AliceGG" }))
            .await
            .unwrap();
        app.duels.confirm(&duel_id, "alice").await.unwrap();

        // The transfer goes out, then the process dies before the task is retired.
        let parts = app.settlement.clone().unwrap();
        let payout = app
            .tasks
            .fetch_pending(100)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.task_type() == TaskType::SettlePayout)
            .unwrap();
        let TaskPayload::SettlePayout(instruction) = payout.payload else {
            unreachable!()
        };
        parts.payouts.settle(&instruction).await.unwrap();
        assert_eq!(parts.network.broadcasts().len(), 1);
        duel_id
    };

    let app = App::with_stores(
        settlement_config(),
        Stores::rocks(RocksTaskStore::open(dir.path()).unwrap()),
    );
    drain(&app).await;

    let parts = app.settlement.clone().unwrap();
    assert!(parts.network.broadcasts().is_empty());
    let payout = parts.payouts.get(&duel_id).await.unwrap().unwrap();
    assert_eq!(payout.status, PayoutStatus::Broadcast);
    assert!(app.tasks.fetch_pending(100).await.unwrap().is_empty());
}
