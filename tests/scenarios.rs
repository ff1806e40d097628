use anyhow::Context;
use request_logic::{
    action::{self, CreateParameters, UnsignedAction},
    address_based::{ADDRESS_BASED_ID, AddressBasedPaymentNetwork, AddressParameters},
    config::{IndexConfig, LogicConfig},
    error::RequestError,
    extension::{ExtensionRegistry, PaymentNetwork},
    identity::Identity,
    request::RequestState,
    service::RequestService,
    signature::{Ed25519SignatureProvider, Ed25519Verifier},
    timestamp_by_location::TimestampBoundaries,
    utils,
};
use sled::open;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tempfile::tempdir; // Use for test db cleanup.

struct Parties {
    provider: Ed25519SignatureProvider,
    payee: Identity,
    payer: Identity,
}

fn parties() -> anyhow::Result<Parties> {
    let mut provider = Ed25519SignatureProvider::new();
    let payee = provider.add_signing_key([11u8; 32])?;
    let payer = provider.add_signing_key([12u8; 32])?;
    Ok(Parties {
        provider,
        payee,
        payer,
    })
}

fn service(db: Arc<sled::Db>) -> anyhow::Result<RequestService> {
    // RUST_LOG=request_logic=debug shows the reducer and index at work
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    RequestService::new(
        db,
        Box::new(Ed25519Verifier),
        Box::new(utils::is_valid_bech32_address),
    )
}

fn invoice(parties: &Parties, amount: &str) -> CreateParameters {
    CreateParameters::new()
        .set_currency("EUR")
        .set_expected_amount(amount)
        .set_payee(parties.payee.clone())
        .set_payer(parties.payer.clone())
}

#[test]
fn reduce_then_cancel() -> anyhow::Result<()> {
    // Sled holds a file lock, so every test gets its own database in a
    // temporary directory.
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_reduce_then_cancel.db"))?);
    let service = service(db)?;
    let parties = parties()?;

    let request = service
        .create_request(&invoice(&parties, "1000"), &parties.payee, &parties.provider, &[])
        .context("Request failed on create: ")?;
    assert_eq!(request.state, RequestState::Created);

    let request = service
        .reduce_expected_amount(&request.request_id, "200", &parties.payee, &parties.provider)
        .context("Request failed on reduce: ")?;
    assert_eq!(request.expected_amount, "800");

    let request = service
        .cancel_request(&request.request_id, &parties.payee, &parties.provider)
        .context("Request failed on cancel: ")?;
    assert_eq!(request.state, RequestState::Canceled);

    // a canceled request refuses any further change
    let err = service
        .reduce_expected_amount(&request.request_id, "100", &parties.payee, &parties.provider)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<RequestError>(),
        Some(&RequestError::state("the request must not be canceled"))
    );

    // and the refused action never reached the log
    let outcome = service.compute_request(&request.request_id)?;
    assert!(outcome.ignored.is_empty());
    let rebuilt = outcome.request.context("request should replay")?;
    assert_eq!(rebuilt.expected_amount, "800");
    assert_eq!(rebuilt.events.len(), 3);
    assert_eq!(
        service
            .get_transactions_by_channel_id(&request.request_id, None)?
            .len(),
        3
    );

    Ok(())
}

#[test]
fn identical_reductions_both_count() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_identical_reductions.db"))?);
    let service = service(db)?;
    let parties = parties()?;

    let request =
        service.create_request(&invoice(&parties, "1000"), &parties.payee, &parties.provider, &[])?;

    // signing is deterministic, so both reductions are the very same bytes
    let request =
        service.reduce_expected_amount(&request.request_id, "100", &parties.payee, &parties.provider)?;
    assert_eq!(request.expected_amount, "900");
    let request =
        service.reduce_expected_amount(&request.request_id, "100", &parties.payee, &parties.provider)?;
    assert_eq!(request.expected_amount, "800");

    let entries = service.get_transactions_by_channel_id(&request.request_id, None)?;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].payload, entries[2].payload);

    let outcome = service.compute_request(&request.request_id)?;
    assert!(outcome.ignored.is_empty());
    assert_eq!(outcome.request, Some(request));

    Ok(())
}

#[test]
fn forged_create_cannot_take_over_a_channel() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_forged_create.db"))?);
    let service = service(db)?;
    let mut parties = parties()?;
    let mallory = parties.provider.add_signing_key([14u8; 32])?;

    let request =
        service.create_request(&invoice(&parties, "1000"), &parties.payee, &parties.provider, &[])?;

    // a valid create of Mallory's own request, older than anything in the channel
    let forged = CreateParameters::new()
        .set_currency("EUR")
        .set_expected_amount("1")
        .set_payee(mallory.clone())
        .set_payer(parties.payer.clone())
        .set_timestamp(0);
    let forged = action::format(UnsignedAction::create(&forged)?, &mallory, &parties.provider)?;
    service.persist_transaction(&request.request_id, &[], forged.to_bytes()?, 0)?;

    let outcome = service.compute_request(&request.request_id)?;
    assert_eq!(outcome.ignored.len(), 1);
    assert!(outcome.ignored[0].reason.contains("does not belong to channel"));
    let rebuilt = outcome.request.context("request should replay")?;
    assert_eq!(rebuilt.payee, Some(parties.payee.clone()));
    assert_eq!(rebuilt.expected_amount, "1000");

    // the channel keeps working for its own parties
    let request = service.accept_request(&request.request_id, &parties.payer, &parties.provider)?;
    assert_eq!(request.state, RequestState::Accepted);

    Ok(())
}

#[test]
fn accept_and_cancel_policy() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_accept_and_cancel.db"))?);
    let service = service(db)?;
    let parties = parties()?;

    let request =
        service.create_request(&invoice(&parties, "50"), &parties.payer, &parties.provider, &[])?;
    assert_eq!(request.creator, parties.payer);

    let request = service.accept_request(&request.request_id, &parties.payer, &parties.provider)?;
    assert_eq!(request.state, RequestState::Accepted);

    // once accepted the payer can no longer walk away
    assert!(
        service
            .cancel_request(&request.request_id, &parties.payer, &parties.provider)
            .is_err()
    );
    let request = service.increase_expected_amount(
        &request.request_id,
        "25",
        &parties.payer,
        &parties.provider,
    )?;
    assert_eq!(request.expected_amount, "75");

    let request = service.cancel_request(&request.request_id, &parties.payee, &parties.provider)?;
    assert_eq!(request.state, RequestState::Canceled);
    assert_eq!(service.compute_request(&request.request_id)?.request, Some(request));

    Ok(())
}

#[test]
fn create_by_outsider_leaves_no_trace() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_outsider.db"))?);
    let service = service(db)?;
    let mut parties = parties()?;
    let outsider = parties.provider.add_signing_key([13u8; 32])?;

    let topics = vec!["invoices".to_string()];
    let result =
        service.create_request(&invoice(&parties, "10"), &outsider, &parties.provider, &topics);

    assert!(result.is_err());
    assert!(service.get_requests_by_topic("invoices", None)?.is_empty());
    assert_eq!(service.index().get_last_transaction_timestamp()?, None);

    Ok(())
}

#[test]
fn requests_found_by_topic() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_topics.db"))?);
    let service = service(db)?;
    let parties = parties()?;

    let shared = "invoices".to_string();
    let first = service.create_request(
        &invoice(&parties, "10"),
        &parties.payee,
        &parties.provider,
        &[shared.clone(), "march".to_string()],
    )?;
    let second = service.create_request(
        &invoice(&parties, "20").set_nonce(2),
        &parties.payee,
        &parties.provider,
        &[shared.clone()],
    )?;
    assert_ne!(first.request_id, second.request_id);

    let found = service.get_requests_by_topic(&shared, None)?;
    let ids: Vec<&str> = found.iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(ids, vec![first.request_id.as_str(), second.request_id.as_str()]);

    let march = service.get_requests_by_topic("march", None)?;
    assert_eq!(march.len(), 1);
    assert_eq!(march[0].expected_amount, "10");

    // every channel is also discoverable under its own id
    assert_eq!(
        service.index().get_channel_ids_for_topic(&second.request_id, None)?,
        vec![second.request_id.clone()]
    );
    assert_eq!(
        service
            .index()
            .location_by_topic()
            .get_topics_from_channel_id(&first.request_id)?,
        vec![shared, "march".to_string(), first.request_id.clone()]
    );

    Ok(())
}

#[test]
fn channel_entries_within_boundaries() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_boundaries.db"))?);
    let service = service(db)?;

    for (payload, timestamp) in [("first", 10), ("second", 20), ("third", 30)] {
        service.persist_transaction("raw", &[], payload.as_bytes().to_vec(), timestamp)?;
    }

    let window = TimestampBoundaries::since(15);
    let entries = service.get_transactions_by_channel_id("raw", Some(&window))?;
    let payloads: Vec<&[u8]> = entries.iter().map(|e| e.payload.as_slice()).collect();
    assert_eq!(payloads, vec![b"second".as_slice(), b"third".as_slice()]);

    let first = service
        .index()
        .timestamp_by_location()
        .get_timestamp_from_location(&entries[0].location)?;
    assert_eq!(first, Some(20));

    // the same bytes again make a second entry of their own
    let again = service.persist_transaction("raw", &[], b"first".to_vec(), 40)?;
    assert_eq!(again.timestamp, 40);
    let all = service.get_transactions_by_channel_id("raw", None)?;
    assert_eq!(all.len(), 4);
    assert_ne!(all[0].location, all[3].location);
    assert_eq!(all[0].payload, all[3].payload);

    // none of it is an action
    let outcome = service.compute_request("raw")?;
    assert!(outcome.request.is_none());
    assert_eq!(outcome.ignored.len(), 4);

    Ok(())
}

#[test]
fn payment_network_through_the_log() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test_payment_network.db");
    let parties = parties()?;
    let network = AddressBasedPaymentNetwork::default();
    let payment_address = utils::new_uuid_to_bech32("pay")?;

    let request_id = {
        let db = Arc::new(open(&db_path)?);
        let service = service(db)?;

        let request =
            service.create_request(&invoice(&parties, "99"), &parties.payee, &parties.provider, &[])?;
        service.apply_extension_action(
            &request.request_id,
            network.create_creation_action(&AddressParameters::default())?,
            &parties.payee,
            &parties.provider,
        )?;
        let request = service.apply_extension_action(
            &request.request_id,
            network.create_add_payment_address_action(&payment_address)?,
            &parties.payee,
            &parties.provider,
        )?;
        service.add_extensions_data(
            &request.request_id,
            vec![serde_json::json!({ "id": ADDRESS_BASED_ID })],
            &parties.payer,
            &parties.provider,
        )?;
        request.request_id
    };

    // everything is rebuilt from the log after a reopen
    let db = Arc::new(open(&db_path)?);
    let service = service(db)?;
    let request = service
        .compute_request(&request_id)?
        .request
        .context("request should replay")?;

    assert_eq!(
        request.extensions[ADDRESS_BASED_ID].value("paymentAddress"),
        Some(payment_address.as_str())
    );
    assert_eq!(request.extensions_data.len(), 1);
    assert_eq!(request.events.len(), 4);

    Ok(())
}

#[test]
fn configured_service() -> anyhow::Result<()> {
    // payee may not back out of a created request, and no extension is known
    let config = LogicConfig::from_json(
        r#"{ "cancelPolicy": {
            "payeeWhenCreated": false,
            "payerWhenCreated": true,
            "payeeWhenAccepted": false,
            "payerWhenAccepted": false
        } }"#,
    )?;
    let service = RequestService::open(
        &IndexConfig::temporary(),
        Box::new(Ed25519Verifier),
        Box::new(utils::is_valid_bech32_address),
    )?
    .with_config(config)
    .with_registry(ExtensionRegistry::empty());
    let parties = parties()?;

    let request =
        service.create_request(&invoice(&parties, "5"), &parties.payee, &parties.provider, &[])?;
    assert!(
        service
            .cancel_request(&request.request_id, &parties.payee, &parties.provider)
            .is_err()
    );

    // without a registered network the action is stored as given, unchecked
    let network = AddressBasedPaymentNetwork::default();
    let request = service.apply_extension_action(
        &request.request_id,
        network.create_add_payment_address_action("anything")?,
        &parties.payer,
        &parties.provider,
    )?;
    assert_eq!(
        request.extensions[ADDRESS_BASED_ID].value("paymentAddress"),
        Some("anything")
    );

    let request = service.cancel_request(&request.request_id, &parties.payer, &parties.provider)?;
    assert_eq!(request.state, RequestState::Canceled);

    Ok(())
}
