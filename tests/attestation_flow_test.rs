// Integration tests for the App Attest flows: registration, assertions,
// challenge lifecycle and per-key serialization
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use devicecheck_server::attest::{AppAttestService, AttestationVerifier, VerificationError};
use devicecheck_server::challenge::ChallengeIssuer;
use devicecheck_server::models::{AppEnvironment, AppIdentity};
use devicecheck_server::store::MemoryCredentialStore;
use devicecheck_server::testing::{
    client_data, test_app_id, test_service, AttestationFixture, BuiltAttestation, TestAuthority,
    TEST_BUNDLE_ID, TEST_TEAM_ID,
};
use std::sync::Arc;

async fn register(service: &AppAttestService, authority: &TestAuthority) -> BuiltAttestation {
    let challenge = service.issue_challenge(None).unwrap();
    let built =
        AttestationFixture::new(authority).build(&STANDARD.decode(&challenge.value).unwrap());
    service
        .register(&built.key_id, &built.cbor_base64(), &challenge.value)
        .await
        .unwrap();
    built
}

/// Base64 assertion and client data for a freshly issued challenge
fn assertion(service: &AppAttestService, built: &BuiltAttestation, counter: u32) -> (String, String) {
    let challenge = service.issue_challenge(None).unwrap();
    let data = client_data(&challenge.value, "purchase");
    let signed = built.device.assert(&test_app_id(), &data, counter);
    (STANDARD.encode(signed), STANDARD.encode(data))
}

#[tokio::test]
async fn test_valid_attestation_registers_exactly_once() {
    let authority = TestAuthority::new();
    let service = test_service(&authority);
    let built = register(&service, &authority).await;

    assert_eq!(service.store().len().await, 1);
    let credential = service.credential(&built.key_id).await.unwrap().unwrap();
    assert_eq!(credential.counter, 0);

    let challenge = service.issue_challenge(None).unwrap();
    let again = AttestationFixture::new(&authority)
        .device(built.device.clone())
        .build(&STANDARD.decode(&challenge.value).unwrap());
    let err = service
        .register(&again.key_id, &again.cbor_base64(), &challenge.value)
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::DuplicateKey(_)));
    assert_eq!(service.store().len().await, 1);
}

#[tokio::test]
async fn test_counter_must_strictly_increase() {
    let authority = TestAuthority::new();
    let service = test_service(&authority);
    let built = register(&service, &authority).await;

    for counter in [1u32, 5, 6] {
        let (signed, data) = assertion(&service, &built, counter);
        assert_eq!(service.assert(&built.key_id, &signed, &data).await.unwrap(), counter);

        let (signed, data) = assertion(&service, &built, counter);
        let err = service.assert(&built.key_id, &signed, &data).await.unwrap_err();
        assert_eq!(err.code(), "replay_detected");
    }

    let (signed, data) = assertion(&service, &built, 2);
    let err = service.assert(&built.key_id, &signed, &data).await.unwrap_err();
    assert!(matches!(
        err,
        VerificationError::ReplayDetected {
            stored: 6,
            received: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_challenge_cannot_be_reused() {
    let authority = TestAuthority::new();
    let service = test_service(&authority);
    let challenge = service.issue_challenge(None).unwrap();
    let bytes = STANDARD.decode(&challenge.value).unwrap();

    let first = AttestationFixture::new(&authority).build(&bytes);
    service
        .register(&first.key_id, &first.cbor_base64(), &challenge.value)
        .await
        .unwrap();

    let second = AttestationFixture::new(&authority).build(&bytes);
    let err = service
        .register(&second.key_id, &second.cbor_base64(), &challenge.value)
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::ChallengeExpiredOrUsed(_)));
}

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let authority = TestAuthority::new();
    let app = AppIdentity::new(TEST_TEAM_ID, TEST_BUNDLE_ID, AppEnvironment::Development);
    let service = AppAttestService::new(
        AttestationVerifier::new(authority.trust_anchor(), app),
        Arc::new(MemoryCredentialStore::new()),
        ChallengeIssuer::new(Duration::milliseconds(50)),
    );

    let challenge = service.issue_challenge(None).unwrap();
    let built =
        AttestationFixture::new(&authority).build(&STANDARD.decode(&challenge.value).unwrap());
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let err = service
        .register(&built.key_id, &built.cbor_base64(), &challenge.value)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "challenge_expired_or_used");
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn test_attestation_checks_report_sub_codes() {
    let authority = TestAuthority::new();
    let service = test_service(&authority);

    for expected in [
        "certificate_validity",
        "aaguid",
        "app_id",
        "counter",
        "credential_id",
        "format",
    ] {
        let fixture = AttestationFixture::new(&authority);
        let fixture = match expected {
            "certificate_validity" => fixture.expired_leaf(),
            "aaguid" => fixture.environment(AppEnvironment::Production),
            "app_id" => fixture.app_id("OTHERTEAM.com.example.other"),
            "counter" => fixture.counter(1),
            "credential_id" => fixture.credential_id(vec![7u8; 32]),
            _ => fixture.format("packed"),
        };

        let challenge = service.issue_challenge(None).unwrap();
        let built = fixture.build(&STANDARD.decode(&challenge.value).unwrap());
        let err = service
            .register(&built.key_id, &built.cbor_base64(), &challenge.value)
            .await
            .unwrap_err();
        assert_eq!(err.check_code(), Some(expected), "{err}");
    }
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn test_untrusted_chain_is_rejected() {
    let trusted = TestAuthority::new();
    let rogue = TestAuthority::new();
    let service = test_service(&trusted);

    let challenge = service.issue_challenge(None).unwrap();
    let built = AttestationFixture::new(&rogue).build(&STANDARD.decode(&challenge.value).unwrap());
    let err = service
        .register(&built.key_id, &built.cbor_base64(), &challenge.value)
        .await
        .unwrap_err();
    assert_eq!(err.check_code(), Some("certificate_chain"));
}

#[tokio::test]
async fn test_attestation_for_other_challenge_fails_nonce() {
    let authority = TestAuthority::new();
    let service = test_service(&authority);

    let challenge = service.issue_challenge(None).unwrap();
    let built = AttestationFixture::new(&authority).build(b"a different challenge");
    let err = service
        .register(&built.key_id, &built.cbor_base64(), &challenge.value)
        .await
        .unwrap_err();
    assert_eq!(err.check_code(), Some("nonce"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_hundred_out_of_order_assertions_each_succeed_once() {
    let authority = TestAuthority::new();
    let service = Arc::new(test_service(&authority));
    let built = register(&service, &authority).await;

    let mut prepared: Vec<(u32, String, String)> = (1..=100u32)
        .map(|counter| {
            let (signed, data) = assertion(&service, &built, counter);
            (counter, signed, data)
        })
        .collect();
    // 37 is coprime with 100, so this visits every counter once in scrambled order
    prepared.sort_by_key(|(counter, _, _)| (counter * 37) % 100);

    let mut tasks = Vec::new();
    for (counter, signed, data) in prepared {
        let service = Arc::clone(&service);
        let key_id = built.key_id.clone();
        tasks.push(tokio::spawn(async move {
            // a client only sends counter c after c - 1 was acknowledged
            loop {
                let stored = service.credential(&key_id).await.unwrap().unwrap().counter;
                if stored + 1 >= counter {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            (counter, service.assert(&key_id, &signed, &data).await)
        }));
    }

    let mut accepted = Vec::new();
    for task in tasks {
        let (counter, result) = task.await.unwrap();
        assert_eq!(result.unwrap(), counter);
        accepted.push(counter);
    }

    accepted.sort_unstable();
    assert_eq!(accepted, (1..=100).collect::<Vec<_>>());
    let stored = service.credential(&built.key_id).await.unwrap().unwrap();
    assert_eq!(stored.counter, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_hundred_racing_assertions_linearize() {
    let authority = TestAuthority::new();
    let service = Arc::new(test_service(&authority));
    let built = register(&service, &authority).await;

    let start = Arc::new(tokio::sync::Barrier::new(100));
    let mut tasks = Vec::new();
    for counter in 1..=100u32 {
        let (signed, data) = assertion(&service, &built, counter);
        let service = Arc::clone(&service);
        let start = Arc::clone(&start);
        let key_id = built.key_id.clone();
        tasks.push(tokio::spawn(async move {
            start.wait().await;
            (counter, service.assert(&key_id, &signed, &data).await)
        }));
    }

    let mut accepted = Vec::new();
    for task in tasks {
        let (counter, result) = task.await.unwrap();
        match result {
            Ok(value) => {
                assert_eq!(value, counter);
                accepted.push(counter);
            }
            // a loser saw a stored counter at or above its own, never a lost update
            Err(VerificationError::ReplayDetected {
                stored, received, ..
            }) => {
                assert_eq!(received, counter);
                assert!(stored >= received);
            }
            Err(other) => panic!("counter {counter} failed unexpectedly: {other}"),
        }
    }

    assert!(accepted.contains(&100));
    let mut unique = accepted.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), accepted.len());
    let stored = service.credential(&built.key_id).await.unwrap().unwrap();
    assert_eq!(stored.counter, 100);
}
