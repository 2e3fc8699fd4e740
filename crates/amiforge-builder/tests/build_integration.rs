//! End-to-end build attempts against the in-memory provider

mod test_utils;

use amiforge_builder::error::{BuildError, find_build_error};
use amiforge_builder::orchestrator::remediation_of;
use amiforge_builder::{BuilderConfig, Orchestrator};
use amiforge_common::tags::TAG_NAME;
use amiforge_common::{ResourceKind, ResourceNames};
use amiforge_test_utils::sample_spec;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{AMI_ID, Event, FakeImageBuilder, FakeImages, available, failed, status};
use tokio_util::sync::CancellationToken;

struct Harness {
    fake: Arc<FakeImageBuilder>,
    images: Arc<FakeImages>,
    orchestrator: Orchestrator<FakeImageBuilder, FakeImages>,
}

fn harness(force: bool) -> Harness {
    harness_with(|config| config.flags.force_recreate = force)
}

fn harness_with(configure: impl FnOnce(&mut BuilderConfig)) -> Harness {
    let fake = Arc::new(FakeImageBuilder::new());
    let images = Arc::new(FakeImages::new());
    let mut config = BuilderConfig::default();
    config.monitor.poll_interval = Duration::from_secs(30);
    config.monitor.timeout = Duration::from_secs(3600);
    configure(&mut config);
    let orchestrator = Orchestrator::new(Arc::clone(&fake), Arc::clone(&images), config);
    Harness {
        fake,
        images,
        orchestrator,
    }
}

#[tokio::test(start_paused = true)]
async fn successful_build_returns_ami_and_removes_pipeline() {
    let h = harness(false);
    h.fake.push_statuses([status("BUILDING"), available()]);

    let result = h
        .orchestrator
        .build(&sample_spec("web", 3), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.ami_id, AMI_ID);
    assert!(result.notes.is_empty());
    assert_eq!(h.fake.count(ResourceKind::Component), 3);
    assert_eq!(h.fake.count(ResourceKind::InfrastructureConfig), 1);
    assert_eq!(h.fake.count(ResourceKind::DistributionConfig), 1);
    assert_eq!(h.fake.count(ResourceKind::Recipe), 1);
    assert_eq!(h.fake.count(ResourceKind::Pipeline), 0);

    let tag_calls = h.images.tag_calls();
    assert_eq!(tag_calls.len(), 1);
    assert_eq!(tag_calls[0].0, vec![AMI_ID.to_string()]);
    assert_eq!(tag_calls[0].1.get(TAG_NAME).map(String::as_str), Some("web"));
    assert_eq!(tag_calls[0].1.get("Environment").map(String::as_str), Some("test"));
}

#[tokio::test(start_paused = true)]
async fn stages_run_in_dependency_order() {
    let h = harness(false);
    h.fake.push_statuses([available()]);

    h.orchestrator
        .build(&sample_spec("web", 2), &CancellationToken::new())
        .await
        .unwrap();

    let events = h.fake.events();
    let position = |wanted: &Event| events.iter().position(|e| e == wanted).unwrap();
    let recipe = position(&Event::Create(ResourceKind::Recipe, "web-recipe".to_string()));
    let pipeline = position(&Event::Create(ResourceKind::Pipeline, "web-pipeline".to_string()));
    for component in ["web-0-shell", "web-1-shell"] {
        assert!(position(&Event::Create(ResourceKind::Component, component.to_string())) < recipe);
    }
    assert!(position(&Event::Create(ResourceKind::InfrastructureConfig, "web-infra".to_string())) < pipeline);
    assert!(position(&Event::Create(ResourceKind::DistributionConfig, "web-dist".to_string())) < pipeline);
    assert!(recipe < pipeline);
    assert!(matches!(events.last(), Some(Event::Delete(ResourceKind::Pipeline, _))));
}

#[tokio::test(start_paused = true)]
async fn recipe_failure_rolls_back_only_created_components() {
    let h = harness(false);
    let names = ResourceNames::new("web", None);
    h.fake.seed(ResourceKind::InfrastructureConfig, &names.infrastructure(), None);
    h.fake.seed(ResourceKind::DistributionConfig, &names.distribution(), None);
    h.fake.fail_create(ResourceKind::Recipe, "recipe quota reached");

    let err = h
        .orchestrator
        .build(&sample_spec("web", 3), &CancellationToken::new())
        .await
        .unwrap_err();

    let deleted = h.fake.deleted();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.iter().all(|(kind, _)| *kind == ResourceKind::Component));
    assert_eq!(h.fake.count(ResourceKind::Component), 0);
    assert_eq!(h.fake.count(ResourceKind::InfrastructureConfig), 1);
    assert_eq!(h.fake.count(ResourceKind::DistributionConfig), 1);

    let remediation = remediation_of(&err).expect("remediation context");
    assert!(remediation.context.contains("recipe"));
    assert!(remediation.hint.is_some());
    assert!(format!("{err:#}").contains("recipe quota reached"));
}

#[tokio::test(start_paused = true)]
async fn failed_image_build_rolls_back_everything_created() {
    let h = harness(false);
    h.fake.push_statuses([status("BUILDING"), failed("Timed out waiting for SSM agent")]);

    let err = h
        .orchestrator
        .build(&sample_spec("web", 2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        find_build_error(&err),
        Some(BuildError::JobFailed { .. })
    ));
    assert!(h.fake.resources().is_empty());
    assert!(h.images.tag_calls().is_empty());

    let deleted: Vec<ResourceKind> = h.fake.deleted().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(deleted.len(), 6);
    assert_eq!(deleted[0], ResourceKind::Pipeline);
    assert_eq!(deleted[1], ResourceKind::Recipe);
    assert!(deleted[4..].iter().all(|k| *k == ResourceKind::Component));
}

#[tokio::test(start_paused = true)]
async fn component_failure_stops_before_recipe() {
    let h = harness(false);
    h.fake.fail_create(ResourceKind::Component, "InvalidParameterValueException: bad document");

    let err = h
        .orchestrator
        .build(&sample_spec("web", 3), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(h.fake.create_calls(ResourceKind::Recipe), 0);
    assert_eq!(h.fake.create_calls(ResourceKind::Pipeline), 0);
    assert!(remediation_of(&err).unwrap().context.contains("components"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_build_rolls_back() {
    let h = harness(false);
    h.fake.push_statuses([status("BUILDING")]);
    let cancel = CancellationToken::new();
    let spec = sample_spec("web", 1);

    let (result, ()) = tokio::join!(h.orchestrator.build(&spec, &cancel), async {
        tokio::time::sleep(Duration::from_secs(100)).await;
        cancel.cancel();
    });

    let err = result.unwrap_err();
    assert!(matches!(find_build_error(&err), Some(BuildError::Cancelled)));
    assert!(h.fake.resources().is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_build_reuses_resources() {
    let h = harness(false);
    h.fake.push_statuses([available()]);
    let spec = sample_spec("web", 2);

    h.orchestrator
        .build(&spec, &CancellationToken::new())
        .await
        .unwrap();
    h.orchestrator
        .build(&spec, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.fake.create_calls(ResourceKind::InfrastructureConfig), 1);
    assert_eq!(h.fake.create_calls(ResourceKind::DistributionConfig), 1);
    assert_eq!(h.fake.create_calls(ResourceKind::Recipe), 1);
    assert_eq!(h.fake.create_calls(ResourceKind::Pipeline), 2);
    assert_eq!(h.fake.count(ResourceKind::Component), 2);
}

#[tokio::test(start_paused = true)]
async fn force_recreate_cleans_up_and_advances_component_versions() {
    let h = harness(true);
    let names = ResourceNames::new("web", None);
    let old_infra = h.fake.seed(ResourceKind::InfrastructureConfig, &names.infrastructure(), None);
    let old_recipe = h.fake.seed(ResourceKind::Recipe, &names.recipe(), Some("1.0.0"));
    h.fake.seed(ResourceKind::Component, "web-0-shell", Some("1.0.0"));
    h.fake.push_statuses([available()]);

    h.orchestrator
        .build(&sample_spec("web", 1), &CancellationToken::new())
        .await
        .unwrap();

    let events = h.fake.events();
    let first_create = events
        .iter()
        .position(|e| matches!(e, Event::Create(..)))
        .unwrap();
    assert!(events[..first_create].contains(&Event::Delete(ResourceKind::InfrastructureConfig, old_infra)));
    assert!(events[..first_create].contains(&Event::Delete(ResourceKind::Recipe, old_recipe)));

    let versions: Vec<String> = h
        .fake
        .resources()
        .into_iter()
        .filter(|r| r.kind == ResourceKind::Component)
        .filter_map(|r| r.version)
        .collect();
    assert_eq!(versions.len(), 2);
    assert!(versions.contains(&"1.0.1".to_string()));
}

fn component_versions(fake: &FakeImageBuilder) -> Vec<String> {
    fake.resources()
        .into_iter()
        .filter(|r| r.kind == ResourceKind::Component)
        .filter_map(|r| r.version)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn forced_build_prunes_old_component_versions() {
    let h = harness_with(|config| {
        config.flags.force_recreate = true;
        config.flags.keep_component_versions = 1;
    });
    h.fake.seed(ResourceKind::Component, "web-0-shell", Some("1.0.0"));
    h.fake.seed(ResourceKind::Component, "web-0-shell", Some("1.0.1"));
    h.fake.push_statuses([available()]);

    let result = h
        .orchestrator
        .build(&sample_spec("web", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.notes.is_empty());
    assert_eq!(component_versions(&h.fake), vec!["1.0.2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failed_prune_is_noted_not_fatal() {
    let h = harness_with(|config| {
        config.flags.force_recreate = true;
        config.flags.keep_component_versions = 1;
    });
    let stuck = h.fake.seed(ResourceKind::Component, "web-0-shell", Some("1.0.0"));
    h.fake.seed(ResourceKind::Component, "web-0-shell", Some("1.0.1"));
    h.fake.fail_delete(&stuck);
    h.fake.push_statuses([available()]);

    let result = h
        .orchestrator
        .build(&sample_spec("web", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.ami_id, AMI_ID);
    assert_eq!(result.notes.len(), 1);
    assert!(result.notes[0].contains("old versions of web-0-shell"));
    let mut left = component_versions(&h.fake);
    left.sort();
    assert_eq!(left, vec!["1.0.0".to_string(), "1.0.2".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unforced_build_leaves_old_versions_alone() {
    let h = harness_with(|config| config.flags.keep_component_versions = 1);
    h.fake.seed(ResourceKind::Component, "web-0-shell", Some("0.9.0"));
    h.fake.push_statuses([available()]);

    h.orchestrator
        .build(&sample_spec("web", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(component_versions(&h.fake).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn tagging_failure_does_not_fail_the_build() {
    let h = harness(false);
    h.fake.push_statuses([available()]);
    h.images.fail_tags();

    let result = h
        .orchestrator
        .build(&sample_spec("web", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.ami_id, AMI_ID);
    assert_eq!(result.notes.len(), 1);
    assert!(result.notes[0].contains("failed to tag"));
    assert_eq!(h.fake.count(ResourceKind::Component), 1);
}

#[tokio::test]
async fn invalid_spec_touches_nothing() {
    let h = harness(false);
    let mut spec = sample_spec("web", 1);
    spec.base_image = None;

    let err = h
        .orchestrator
        .build(&spec, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::Validation(_))
    ));
    assert!(h.fake.events().is_empty());
}
