mod support;

use std::collections::BTreeMap;

use rpp_validator_stats::validator_info::ShardValidatorInfo;
use rpp_validator_stats::{
    EnableEpochsConfig, Header, HeaderCache, ListStatus, MetaHeader, ShardData, SignRate,
    ValidatorStatsError, METACHAIN_SHARD_ID,
};
use support::{
    header_hash, pub_key, shard_header, GroupRequest, Harness, HarnessConfig, ALL_SIGNED,
    START_RATING,
};

fn cache_with(headers: impl IntoIterator<Item = (Vec<u8>, Header)>) -> HeaderCache {
    headers.into_iter().collect()
}

fn shard_cache(nonce: u64, round: u64) -> HeaderCache {
    cache_with([(
        header_hash(0, nonce),
        Header::Shard(shard_header(0, nonce, round, vec![ALL_SIGNED])),
    )])
}

fn eligible_keys() -> Vec<Vec<u8>> {
    (0..4).map(|i| pub_key(0, i)).collect()
}

#[test]
fn signed_block_credits_leader_and_group() {
    let mut harness = Harness::new(HarnessConfig::default());
    let genesis_root = harness.processor.root_hash().expect("root");

    let mut header = shard_header(0, 2, 2, vec![ALL_SIGNED]);
    header.accumulated_fees = 1_000;
    header.developer_fees = 200;
    let root = harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");
    assert_ne!(root, genesis_root);

    // round 2 selects [v2, v3, v0] led by v2
    let leader = harness.account(&pub_key(0, 2));
    assert_eq!(leader.leader_success_rate().num_success, 1);
    assert_eq!(leader.temp_rating(), START_RATING + 4);
    assert_eq!(leader.accumulated_fees(), 80);
    assert_eq!(leader.consecutive_proposer_misses(), 0);

    for index in [3, 0] {
        let member = harness.account(&pub_key(0, index));
        assert_eq!(member.validator_success_rate().num_success, 1);
        assert_eq!(member.leader_success_rate().num_success, 0);
        assert_eq!(member.temp_rating(), START_RATING + 2);
        assert_eq!(member.num_selected_in_success_blocks(), 1);
    }

    let outsider = harness.account(&pub_key(0, 1));
    assert_eq!(outsider.temp_rating(), START_RATING);
    assert_eq!(outsider.num_selected_in_success_blocks(), 0);
    assert_eq!(harness.processor.pending_missed_blocks(), 0);
}

#[test]
fn unsigned_members_are_counted_as_ignored_signatures() {
    let mut harness = Harness::new(HarnessConfig::default());
    // leader (bit 0) and v0 (bit 2) signed, v3 (bit 1) did not
    let header = shard_header(0, 2, 2, vec![0b0000_0101]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    let ignored = harness.account(&pub_key(0, 3));
    assert_eq!(ignored.validator_ignored_signatures(), 1);
    assert_eq!(ignored.validator_success_rate().num_success, 0);
    assert_eq!(ignored.temp_rating(), START_RATING + 2);
    assert_eq!(harness.account(&pub_key(0, 0)).validator_success_rate().num_success, 1);
}

#[test]
fn leader_without_signature_falls_back_to_rating() {
    let mut harness = Harness::new(HarnessConfig::default());
    harness
        .processor
        .process(&ShardValidatorInfo {
            public_key: pub_key(0, 2),
            shard_id: 0,
            list: ListStatus::Eligible,
            index: 2,
            temp_rating: 30,
        })
        .expect("process");
    let before = harness.account(&pub_key(0, 2));
    assert_eq!(before.rating(), 30);
    assert_eq!(before.temp_rating(), START_RATING);

    // v2 leads round 2 with its bit unset
    let header = shard_header(0, 2, 2, vec![0b0000_0110]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    let leader = harness.account(&pub_key(0, 2));
    assert_eq!(leader.leader_success_rate(), SignRate::default());
    assert_eq!(leader.temp_rating(), 30);
    assert_eq!(leader.rating(), 30);
    assert_eq!(leader.num_selected_in_success_blocks(), 1);
}

#[test]
fn skipped_rounds_penalize_recomputed_groups() {
    let mut harness = Harness::new(HarnessConfig::default());
    harness.coordinator.clear_requests();

    let header = shard_header(0, 2, 4, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    let requests = harness.coordinator.requests();
    for round in [2, 3] {
        assert!(
            requests.contains(&GroupRequest {
                round,
                shard_id: 0,
                epoch: 0
            }),
            "group of skipped round {round} was not recomputed"
        );
    }

    let accounts: Vec<_> = eligible_keys()
        .iter()
        .map(|key| harness.account(key))
        .collect();
    let leader_misses: u32 = accounts
        .iter()
        .map(|account| account.leader_success_rate().num_failure)
        .sum();
    let validator_misses: u32 = accounts
        .iter()
        .map(|account| account.validator_success_rate().num_failure)
        .sum();
    assert_eq!(leader_misses, 2);
    assert_eq!(validator_misses, 2 * (3 - 1));
    assert_eq!(harness.processor.pending_missed_blocks(), 0);

    // v3 led round 3 and validated round 2 without being in the round 4 group
    let v3 = harness.account(&pub_key(0, 3));
    assert_eq!(v3.temp_rating(), START_RATING - 8 - 1);
    assert_eq!(v3.consecutive_proposer_misses(), 1);
    // v2 led round 2 and was credited as a member of round 4 first
    assert_eq!(harness.account(&pub_key(0, 2)).temp_rating(), START_RATING + 2 - 8);
    assert_eq!(harness.processor.status().snapshot().last_missed_rounds, 2);
}

#[test]
fn consecutive_leader_misses_accelerate() {
    let mut harness = Harness::new(HarnessConfig::default());
    // rounds 2..=9 are skipped; v3 leads rounds 3 and 7
    let header = shard_header(0, 2, 10, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    let v3 = harness.account(&pub_key(0, 3));
    assert_eq!(v3.leader_success_rate().num_failure, 2);
    assert_eq!(v3.consecutive_proposer_misses(), 2);
    // credited in round 10, then two proposer decreases (-8, -16) and four
    // validator decreases
    assert_eq!(v3.validator_success_rate().num_failure, 4);
    assert_eq!(v3.temp_rating(), START_RATING + 2 - 8 - 16 - 4);
}

#[test]
fn long_gaps_spread_penalty_over_eligible_list() {
    let config = HarnessConfig {
        max_computable_rounds: 2,
        ..HarnessConfig::default()
    };
    let mut harness = Harness::new(config);
    harness.coordinator.clear_requests();

    // 10 missed rounds over 4 validators with groups of 3
    let header = shard_header(0, 2, 12, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    assert_eq!(
        harness.coordinator.requests(),
        vec![GroupRequest {
            round: 12,
            shard_id: 0,
            epoch: 0
        }]
    );
    for key in eligible_keys() {
        let account = harness.account(&key);
        assert_eq!(account.leader_success_rate().num_failure, 3);
        assert_eq!(account.validator_success_rate().num_failure, 8);
    }
    // v3 is outside the round 12 group: 3 proposer and 8 validator decreases
    assert_eq!(
        harness.account(&pub_key(0, 3)).temp_rating(),
        START_RATING - 3 * 8 - 8
    );
}

#[test]
fn more_missed_rounds_never_rate_higher() {
    let mut ratings = Vec::new();
    for round in [12, 22, 42] {
        let mut harness = Harness::new(HarnessConfig {
            max_computable_rounds: 2,
            ..HarnessConfig::default()
        });
        let header = shard_header(0, 2, round, vec![ALL_SIGNED]);
        harness
            .processor
            .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
            .expect("update");
        ratings.push(harness.temp_ratings(&eligible_keys()));
    }
    for pair in ratings.windows(2) {
        for (fewer, more) in pair[0].iter().zip(&pair[1]) {
            assert!(more <= fewer, "rating rose from {fewer} to {more}");
        }
    }
}

#[test]
fn exact_path_penalty_grows_with_missed_rounds() {
    const CURRENT_ROUND: u64 = 40;
    let max_computable_rounds = CURRENT_ROUND - 2;

    let mut ratings = Vec::new();
    for missed in 1..=max_computable_rounds {
        let mut harness = Harness::new(HarnessConfig {
            max_computable_rounds,
            ..HarnessConfig::default()
        });
        // the credited group stays the round 40 one, only the gap widens
        let previous_round = CURRENT_ROUND - 1 - missed;
        let header = shard_header(0, 2, CURRENT_ROUND, vec![ALL_SIGNED]);
        harness
            .processor
            .update_peer_state(&Header::Shard(header), &shard_cache(1, previous_round))
            .expect("update");
        assert_eq!(
            harness.processor.status().snapshot().last_missed_rounds,
            missed
        );
        ratings.push(harness.temp_ratings(&eligible_keys()));
    }
    for (missed, pair) in (1..).zip(ratings.windows(2)) {
        for (fewer, more) in pair[0].iter().zip(&pair[1]) {
            assert!(
                more <= fewer,
                "rating rose from {fewer} to {more} going from {missed} to {} missed rounds",
                missed + 1
            );
        }
    }
    assert!(ratings
        .last()
        .map_or(false, |last| last.iter().all(|rating| *rating >= 1)));
}

#[test]
fn stuck_chain_leaves_ratings_untouched() {
    let mut harness = Harness::new(HarnessConfig {
        max_consecutive_rounds_of_rating_decrease: 5,
        ..HarnessConfig::default()
    });
    let header = shard_header(0, 2, 20, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    for key in eligible_keys() {
        let account = harness.account(&key);
        assert_eq!(account.leader_success_rate().num_failure, 0);
        assert_eq!(account.validator_success_rate().num_failure, 0);
    }
    assert_eq!(harness.processor.status().snapshot().last_missed_rounds, 18);
}

#[test]
fn ratings_are_not_decreased_before_enable_epoch() {
    let mut harness = Harness::new(HarnessConfig {
        rating_enable_epoch: 3,
        ..HarnessConfig::default()
    });
    let header = shard_header(0, 2, 6, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");
    // v1 leads skipped round 5 and is outside the round 6 group
    let v1 = harness.account(&pub_key(0, 1));
    assert_eq!(v1.leader_success_rate().num_failure, 0);
    assert_eq!(v1.temp_rating(), START_RATING);
}

#[test]
fn inactive_validator_is_jailed_once_rating_collapses() {
    let mut harness = Harness::new(HarnessConfig::default());
    harness.coordinator.set_leaving(0, vec![pub_key(0, 3)]);
    harness
        .processor
        .save_nodes_coordinator_updates(0)
        .expect("coordinator updates");
    assert_eq!(harness.account(&pub_key(0, 3)).list(), ListStatus::Inactive);

    // v3 leads skipped rounds 3, 7 and 11
    let header = shard_header(0, 2, 13, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");

    let v3 = harness.account(&pub_key(0, 3));
    assert_eq!(v3.temp_rating(), 1);
    assert_eq!(v3.list(), ListStatus::Jailed);
    assert!(harness.processor.is_low_rating(&pub_key(0, 3)));
    // eligible validators are never jailed by missed blocks
    assert_eq!(harness.account(&pub_key(0, 0)).list(), ListStatus::Eligible);
}

#[test]
fn genesis_nonce_is_a_no_op() {
    let mut harness = Harness::new(HarnessConfig::default());
    let root = harness.processor.root_hash().expect("root");
    harness.coordinator.clear_requests();

    let header = shard_header(0, 0, 0, Vec::new());
    let returned = harness
        .processor
        .update_peer_state(&Header::Shard(header), &HeaderCache::new())
        .expect("update");
    assert_eq!(returned, root);
    assert!(harness.coordinator.requests().is_empty());
}

#[test]
fn first_block_needs_no_predecessor() {
    let mut harness = Harness::new(HarnessConfig::default());
    let header = shard_header(0, 1, 1, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &HeaderCache::new())
        .expect("update");
    // round 1 is led by v1
    assert_eq!(harness.account(&pub_key(0, 1)).leader_success_rate().num_success, 1);
}

#[test]
fn missing_ancestor_leaves_root_unchanged() {
    let mut harness = Harness::new(HarnessConfig::default());
    let before = harness.processor.root_hash().expect("root");

    let header = shard_header(0, 2, 4, vec![ALL_SIGNED]);
    let err = harness
        .processor
        .update_peer_state(&Header::Shard(header), &HeaderCache::new())
        .expect_err("missing predecessor");
    match err {
        ValidatorStatsError::MissingAncestorHeader { hash, round, nonce } => {
            assert_eq!(hash, hex::encode(header_hash(0, 1)));
            assert_eq!((round, nonce), (4, 2));
        }
        other => panic!("unexpected error {other:?}"),
    }

    assert_eq!(harness.processor.root_hash().expect("root"), before);
    assert_eq!(harness.processor.pending_missed_blocks(), 0);
    assert_eq!(
        harness.account(&pub_key(0, 0)).leader_success_rate(),
        SignRate::default()
    );
}

#[test]
fn empty_bitmap_is_rejected_without_mutation() {
    let mut harness = Harness::new(HarnessConfig::default());
    let before = harness.processor.root_hash().expect("root");
    let header = shard_header(0, 2, 2, Vec::new());
    let err = harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect_err("nil bitmap");
    assert!(matches!(err, ValidatorStatsError::NilSignatureBitmap));
    assert_eq!(harness.processor.root_hash().expect("root"), before);
}

#[test]
fn full_consensus_credits_every_member() {
    let mut harness = Harness::new(HarnessConfig {
        enable_epochs: EnableEpochsConfig {
            full_consensus_enable_epoch: 0,
            ..EnableEpochsConfig::default()
        },
        ..HarnessConfig::default()
    });
    let header = shard_header(0, 2, 2, Vec::new());
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");
    assert_eq!(harness.account(&pub_key(0, 2)).leader_success_rate().num_success, 1);
    for index in [3, 0] {
        let member = harness.account(&pub_key(0, index));
        assert_eq!(member.validator_success_rate().num_success, 1);
        assert_eq!(member.validator_ignored_signatures(), 0);
    }
}

#[test]
fn shard_predecessor_must_be_a_shard_header() {
    let mut harness = Harness::new(HarnessConfig::default());
    let before = harness.processor.root_hash().expect("root");
    let cache = cache_with([(
        header_hash(0, 1),
        Header::Meta(MetaHeader {
            nonce: 1,
            round: 1,
            ..MetaHeader::default()
        }),
    )]);
    let header = shard_header(0, 2, 2, vec![ALL_SIGNED]);
    let err = harness
        .processor
        .update_peer_state(&Header::Shard(header), &cache)
        .expect_err("meta predecessor");
    assert!(matches!(err, ValidatorStatsError::InvalidHeaderShape(_)));
    assert_eq!(harness.processor.root_hash().expect("root"), before);
}

fn meta_config() -> HarnessConfig {
    HarnessConfig {
        eligible: BTreeMap::from([(0, 4), (METACHAIN_SHARD_ID, 3)]),
        ..HarnessConfig::default()
    }
}

fn meta_block(nonce: u64, round: u64, prev_hash: &[u8]) -> MetaHeader {
    MetaHeader {
        nonce,
        round,
        prev_hash: prev_hash.to_vec(),
        pub_keys_bitmap: vec![ALL_SIGNED],
        ..MetaHeader::default()
    }
}

#[test]
fn meta_header_credits_shard_blocks_and_previous_meta_block() {
    let mut harness = Harness::new(meta_config());

    let shard_block = shard_header(0, 3, 3, vec![ALL_SIGNED]);
    let mut previous_meta = meta_block(1, 4, b"meta-0");
    previous_meta.accumulated_fees = 500;
    previous_meta.developer_fees = 100;

    let cache = cache_with([
        (b"meta-1".to_vec(), Header::Meta(previous_meta)),
        (header_hash(0, 3), Header::Shard(shard_block.clone())),
        (
            header_hash(0, 2),
            Header::Shard(shard_header(0, 2, 2, vec![ALL_SIGNED])),
        ),
    ]);
    let mut header = meta_block(2, 5, b"meta-1");
    header.shard_info = vec![ShardData::from_header(header_hash(0, 3), &shard_block)];

    harness
        .processor
        .update_peer_state(&Header::Meta(header), &cache)
        .expect("update");

    // shard round 3 selects [v3, v0, v1]
    assert_eq!(harness.account(&pub_key(0, 3)).leader_success_rate().num_success, 1);
    assert_eq!(
        harness.account(&pub_key(0, 1)).validator_success_rate().num_success,
        1
    );

    // metachain round 4 selects [meta-v1, meta-v2, meta-v0]
    let meta_leader = harness.account(&pub_key(METACHAIN_SHARD_ID, 1));
    assert_eq!(meta_leader.leader_success_rate().num_success, 1);
    assert_eq!(meta_leader.temp_rating(), START_RATING + 6);
    assert_eq!(meta_leader.accumulated_fees(), 40);
    let meta_member = harness.account(&pub_key(METACHAIN_SHARD_ID, 0));
    assert_eq!(meta_member.validator_success_rate().num_success, 1);
    assert_eq!(meta_member.temp_rating(), START_RATING + 3);
}

#[test]
fn first_meta_block_skips_previous_meta_credit() {
    let mut harness = Harness::new(meta_config());
    let cache = cache_with([(
        b"meta-0".to_vec(),
        Header::Meta(meta_block(0, 0, b"")),
    )]);
    harness
        .processor
        .update_peer_state(&Header::Meta(meta_block(1, 1, b"meta-0")), &cache)
        .expect("update");
    for index in 0..3 {
        let account = harness.account(&pub_key(METACHAIN_SHARD_ID, index));
        assert_eq!(account.num_selected_in_success_blocks(), 0);
    }
}

#[test]
fn meta_header_with_unknown_shard_block_is_rejected() {
    let mut harness = Harness::new(meta_config());
    let before = harness.processor.root_hash().expect("root");
    let shard_block = shard_header(0, 3, 3, vec![ALL_SIGNED]);
    let cache = cache_with([(b"meta-1".to_vec(), Header::Meta(meta_block(1, 4, b"meta-0")))]);
    let mut header = meta_block(2, 5, b"meta-1");
    header.shard_info = vec![ShardData::from_header(header_hash(0, 3), &shard_block)];

    let err = harness
        .processor
        .update_peer_state(&Header::Meta(header), &cache)
        .expect_err("unknown shard block");
    assert!(matches!(
        err,
        ValidatorStatsError::MissingAncestorHeader { nonce: 3, .. }
    ));
    assert_eq!(harness.processor.root_hash().expect("root"), before);
}

#[test]
fn revert_restores_recorded_root() {
    let mut harness = Harness::new(HarnessConfig::default());
    let committed = harness.processor.commit().expect("commit");

    let header = shard_header(0, 2, 2, vec![ALL_SIGNED]);
    harness
        .processor
        .update_peer_state(&Header::Shard(header), &shard_cache(1, 1))
        .expect("update");
    let advanced = harness.processor.commit().expect("commit");
    assert_ne!(advanced, committed);

    let recorded = MetaHeader {
        validator_stats_root_hash: committed,
        ..MetaHeader::default()
    };
    harness.processor.revert_peer_state(&recorded).expect("revert");
    assert_eq!(harness.processor.root_hash().expect("root"), committed);
    assert_eq!(harness.account(&pub_key(0, 2)).temp_rating(), START_RATING);

    let unknown = MetaHeader {
        validator_stats_root_hash: [9u8; 32],
        ..MetaHeader::default()
    };
    assert!(matches!(
        harness.processor.revert_peer_state(&unknown),
        Err(ValidatorStatsError::AccountStore(_))
    ));
}

#[test]
fn last_finalized_root_hash_ignores_empty_input() {
    let harness = Harness::new(HarnessConfig::default());
    assert_eq!(harness.processor.last_finalized_root_hash(), None);
    harness.processor.set_last_finalized_root_hash(&[4u8; 32]);
    harness.processor.set_last_finalized_root_hash(&[]);
    assert_eq!(harness.processor.last_finalized_root_hash(), Some([4u8; 32]));
}
