//! Property-based tests for the claim rules
//!
//! Each case drives the agent through the dispatcher against a fresh
//! in-memory database.

use super::tests::{ended, Harness};
use super::*;
use proptest::prelude::*;
use std::future::Future;

fn run<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn arb_padding() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(" ".to_string()),
        Just("\t ".to_string()),
        Just("\n".to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_claims_never_exceed_supply(available in 1i64..6, claimants in 1usize..10) {
        let (claimed, winners) = run(async {
            let h = Harness::new().await;
            h.open_campaign(available).await;
            h.invite("referrer").await;

            let users: Vec<String> = (0..claimants).map(|i| format!("user-{i}")).collect();
            for user in &users {
                h.follow_now(user);
                prop_assert_eq!(h.claim(user, "000000").await, ended());
            }
            let winners = users.iter().filter(|u| h.profile(u).has_claimed()).count();
            Ok::<_, TestCaseError>((h.claimed(), winners))
        })?;

        let expected = available.min(i64::try_from(claimants).unwrap());
        prop_assert_eq!(claimed, expected);
        prop_assert_eq!(i64::try_from(winners).unwrap(), expected);
    }

    #[test]
    fn prop_claimed_user_never_claims_again(retries in 1usize..5, other_referrers in 1usize..4) {
        let (claimed, parent) = run(async {
            let h = Harness::new().await;
            h.open_campaign(100).await;
            h.invite("first").await;
            for i in 0..other_referrers {
                h.invite(&format!("other-{i}")).await;
            }

            h.follow_now("claimant");
            h.claim("claimant", "000000").await;
            for attempt in 0..retries {
                let serial = u32::try_from(attempt % (other_referrers + 1)).unwrap();
                let code = SharingCode::from_serial(serial).unwrap();
                h.claim("claimant", code.as_str()).await;
            }
            Ok::<_, TestCaseError>((h.claimed(), h.profile("claimant").parent_user_id))
        })?;

        prop_assert_eq!(claimed, 1);
        prop_assert_eq!(parent.as_deref(), Some("first"));
    }

    #[test]
    fn prop_owner_cannot_self_claim(invites in 1u32..5, pick in any::<prop::sample::Index>()) {
        let (claimed, has_claimed) = run(async {
            let h = Harness::new().await;
            h.open_campaign(10).await;
            for _ in 0..invites {
                h.invite("owner").await;
            }
            h.follow_now("owner");

            let serial = u32::try_from(pick.index(usize::try_from(invites).unwrap())).unwrap();
            let code = SharingCode::from_serial(serial).unwrap();
            h.claim("owner", code.as_str()).await;
            Ok::<_, TestCaseError>((h.claimed(), h.profile("owner").has_claimed()))
        })?;

        prop_assert_eq!(claimed, 0);
        prop_assert!(!has_claimed);
    }

    #[test]
    fn prop_pre_campaign_followers_rejected(seconds_before in 1i64..50_000_000) {
        let (claimed, reply) = run(async {
            let h = Harness::new().await;
            h.open_campaign(10).await;
            h.invite("referrer").await;

            let started = h.agent.campaign().started_at.unwrap();
            let followed = started - chrono::Duration::seconds(seconds_before);
            h.follow_at("late", &followed.format(FOLLOW_TIME_FORMAT).to_string());
            h.claim("late", "000000").await;
            Ok::<_, TestCaseError>((h.claimed(), h.last("late")))
        })?;

        prop_assert_eq!(claimed, 0);
        prop_assert_eq!(
            reply.as_deref(),
            Some("Sorry, you are not a user following us after the campaign start.")
        );
    }

    #[test]
    fn prop_six_digit_codes_parse(serial in 0u32..1_000_000, pad in arb_padding()) {
        let padded = format!("{pad}{serial:06}{pad}");
        prop_assert_eq!(SharingCode::parse(&padded), SharingCode::from_serial(serial));
    }

    #[test]
    fn prop_wrong_length_codes_rejected(digits in "[0-9]{0,5}|[0-9]{7,12}") {
        prop_assert_eq!(SharingCode::parse(&digits), None);
    }

    #[test]
    fn prop_codes_with_non_digits_rejected(code in "[0-9]{0,5}[^0-9\\s][0-9]{0,5}") {
        prop_assert_eq!(SharingCode::parse(&code), None);
    }
}
