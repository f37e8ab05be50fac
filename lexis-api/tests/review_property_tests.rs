//! Property-Based Tests for the Review Loop
//!
//! For any sequence of pass/fail outcomes with arbitrary gaps between them,
//! the persisted view count only grows on passes, the card sits in exactly
//! one stage, and a mastered card is never due again.

use chrono::Duration;
use lexis_api::{NewCardRequest, ReviewRequest, ReviewStage};
use lexis_core::MASTERY_THRESHOLD;
use lexis_storage::CardStore;
use lexis_test_utils::{fixtures, generators, TestApp};
use proptest::prelude::*;
use tokio::runtime::Runtime;

const USER: i64 = 1;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_review_history_keeps_one_stage(history in generators::arb_review_history()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let app = TestApp::start(fixtures::seeded_store(3, &[USER])).await.map_err(fail)?;
            let service = &app.state.service;
            service
                .create_card(USER, NewCardRequest { known: false, word_id: 1, idempotency_key: None })
                .await
                .map_err(fail)?;

            let mut passes = 0;
            let mut mastered = false;
            for (passed, gap_minutes) in history {
                app.clock.advance(Duration::minutes(gap_minutes));
                if service.count_due(USER).await.map_err(fail)? == 0 {
                    continue;
                }
                prop_assert!(!mastered, "mastered card came due");

                let receipt = service
                    .review_card(USER, ReviewRequest { passed, word_id: 1, idempotency_key: None })
                    .await
                    .map_err(fail)?;
                if passed {
                    passes += 1;
                }
                prop_assert_eq!(receipt.count_of_views, 1 + passes);
                match receipt.stage {
                    ReviewStage::Waiting => {
                        let next = receipt.next_review_at.ok_or_else(|| fail("waiting without time"))?;
                        prop_assert!(next > receipt.reviewed_at);
                    }
                    ReviewStage::Due => prop_assert!(!passed),
                    ReviewStage::Mastered => {
                        prop_assert!(receipt.count_of_views >= MASTERY_THRESHOLD);
                        mastered = true;
                    }
                }

                let stats = service.stats(USER).await.map_err(fail)?;
                prop_assert_eq!(stats.created, 1);
                prop_assert_eq!(stats.due + stats.waiting + stats.mastered, 1);
            }

            let card = app.store.card_get(USER, 1).await.map_err(fail)?;
            prop_assert_eq!(card.map(|c| c.count_of_views), Some(1 + passes));
            Ok(())
        })?;
    }

    #[test]
    fn prop_rehydrated_profiles_match_store(
        cards in prop::collection::vec(generators::arb_count_of_views(), 1..12),
        gap_minutes in 0i64..2_000_000,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = fixtures::seeded_store(cards.len() as i64, &[USER]);
            let last_view = fixtures::fixture_now() - Duration::minutes(gap_minutes);
            for (i, views) in cards.iter().enumerate() {
                store.seed_card(fixtures::card(USER, i as i64 + 1, *views, last_view));
            }
            let app = TestApp::start(store).await.map_err(fail)?;

            let stats = app.state.service.stats(USER).await.map_err(fail)?;
            let expected_mastered = cards.iter().filter(|v| **v >= MASTERY_THRESHOLD).count();
            prop_assert_eq!(stats.created, cards.len());
            prop_assert_eq!(stats.mastered, expected_mastered);
            prop_assert_eq!(stats.due + stats.waiting, cards.len() - expected_mastered);
            Ok(())
        })?;
    }
}
