//! Checks over a [Report], panicking with a description of the mismatch.

use super::Report;
use beacon_chain::MemberIndex;

/// Assert that a result was published on the chain and observed by the engine.
pub fn assert_dkg_result_published(report: &Report) {
    assert!(
        report.dkg_result().is_some(),
        "expected dkg result to be published"
    );
    assert!(
        report.dkg_result_signatures().is_some(),
        "expected dkg result signatures to be published"
    );
}

/// Assert that no result was observed before the publication timeout.
pub fn assert_no_dkg_result_published(report: &Report) {
    assert!(
        report.dkg_result().is_none(),
        "expected no dkg result, found {:?}",
        report.dkg_result()
    );
    assert!(report.dkg_result_signatures().is_none());
}

/// Assert that exactly `expected` members produced a signer without error.
pub fn assert_success_signers_count(report: &Report, expected: usize) {
    let successes = report
        .outcomes()
        .iter()
        .filter(|outcome| outcome.is_success())
        .count();
    assert_eq!(successes, expected, "unexpected number of successful signers");
}

pub fn assert_member_failures_count(report: &Report, expected: usize) {
    assert_eq!(
        report.member_failures().len(),
        expected,
        "unexpected member failures: {:?}",
        report.member_failures()
    );
}

/// Assert that all signers derived the same group key (and that it matches the published one).
pub fn assert_same_public_key(report: &Report) {
    let Some(first) = report.signers().first() else {
        return;
    };
    for signer in report.signers() {
        assert_eq!(
            signer.group_public_key(),
            first.group_public_key(),
            "member {} derived a different group key",
            signer.member()
        );
    }
    if let Some(result) = report.dkg_result() {
        assert_eq!(
            result.group_public_key.as_slice(),
            first.group_public_key(),
            "published group key does not match signers"
        );
    }
}

/// Assert that the published result is supported by exactly `expected` signatures.
pub fn assert_signatures_count(report: &Report, expected: usize) {
    let signatures = report
        .dkg_result_signatures()
        .expect("expected dkg result signatures to be published");
    assert_eq!(signatures.len(), expected, "unexpected number of signatures");
}

/// Assert that the published result marks exactly `expected` members as inactive.
pub fn assert_inactive_members(report: &Report, expected: &[MemberIndex]) {
    let result = report
        .dkg_result()
        .expect("expected dkg result to be published");
    assert_eq!(
        result.inactive.as_slice(),
        expected,
        "unexpected inactive members"
    );
}
