//! Generic event channel behavior as seen by controllers sharing a context.

use std::sync::Arc;

use kube_manager_context::{
    ControllerManagerContext, GenericEvent, GroupVersionKind, Options, TracingRecorder,
};

fn context() -> Arc<ControllerManagerContext> {
    let options = Options {
        pod_name: "acme-mgr".to_string(),
        pod_namespace: "acme-system".to_string(),
        ..Options::default()
    }
    .defaults();
    let client =
        kube::Client::try_from(kube::Config::new("http://127.0.0.1:6443".parse().unwrap()))
            .unwrap();

    Arc::new(ControllerManagerContext::new(
        &options,
        client,
        Arc::new(TracingRecorder::new("acme-mgr")),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_callers_share_one_channel_per_kind() {
    let ctx = context();
    let kinds = [
        GroupVersionKind::gvk("", "v1", "Pod"),
        GroupVersionKind::gvk("apps", "v1", "Deployment"),
        GroupVersionKind::gvk("example.com", "v1alpha1", "Widget"),
    ];

    let barrier = Arc::new(tokio::sync::Barrier::new(64));
    let mut tasks = Vec::new();
    for i in 0..64 {
        let ctx = ctx.clone();
        let barrier = barrier.clone();
        let gvk = kinds[i % kinds.len()].clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            (gvk.clone(), ctx.generic_event_channel_for(&gvk))
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    for gvk in &kinds {
        let canonical = ctx.generic_event_channel_for(gvk);
        for (key, channel) in &results {
            assert_eq!(key == gvk, canonical.same_channel(channel));
        }
    }
}

#[tokio::test]
async fn events_flow_between_controllers() {
    let ctx = context();
    let gvk = GroupVersionKind::gvk("example.com", "v1", "Widget");

    let mut first = ctx.generic_event_channel_for(&gvk).subscribe();
    let mut second = ctx.generic_event_channel_for(&gvk).subscribe();

    let delivered = ctx
        .generic_event_channel_for(&gvk)
        .send(GenericEvent::named("gadget", Some("apps")));
    assert_eq!(delivered, 2);

    for rx in [&mut first, &mut second] {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), Some("gadget"));
        assert_eq!(event.namespace(), Some("apps"));
    }
}

#[tokio::test]
async fn events_do_not_cross_kinds() {
    let ctx = context();
    let pods = GroupVersionKind::gvk("", "v1", "Pod");
    let services = GroupVersionKind::gvk("", "v1", "Service");

    let mut pod_events = ctx.generic_event_channel_for(&pods).subscribe();
    ctx.generic_event_channel_for(&services)
        .send(GenericEvent::named("frontend", Some("default")));
    ctx.generic_event_channel_for(&pods)
        .send(GenericEvent::named("frontend-0", Some("default")));

    let event = pod_events.recv().await.unwrap();
    assert_eq!(event.name(), Some("frontend-0"));
    assert!(pod_events.try_recv().is_err());
}
