mod common;

use std::sync::Arc;

use ckman_core::registry::{MemoryConfigStore, RegistrySnapshot};
use ckman_core::types::SshAuth;
use ckman_core::RetCode;
use common::{cluster_conf, Harness};

const HOSTS: [&str; 4] = ["192.168.0.1", "192.168.0.2", "192.168.0.3", "192.168.0.4"];

#[test_log::test(tokio::test)]
async fn test_deploy_four_hosts_without_replication() {
    let h = Harness::new();

    let response = h.service.deploy_ck(cluster_conf("c1", &HOSTS, false)).await;

    assert_eq!(response.code, RetCode::Success);
    assert_eq!(response.code.code(), "0000");
    assert!(response.warnings.is_empty());

    let stored = h.registry().get_cluster("c1").unwrap();
    assert_eq!(stored.shards.len(), 4);
    assert!(stored.shards.iter().all(|s| s.replicas.len() == 1));
    assert_eq!(stored.shards[2].replicas[0].hostname, "ck-192.168.0.3");

    let published = RegistrySnapshot::unmarshal(&h.store.payload()).unwrap();
    assert_eq!(published.config_version, 1);
    assert!(published.clusters.contains_key("c1"));
    assert_eq!(h.store.publish_count(), 1);
    assert!(h.workdir.path().join("clusters.json").exists());

    // every host got every package
    assert_eq!(h.executor.copied.lock().len(), 12);
    assert_eq!(h.executor.commands_matching("systemctl start clickhouse-server").len(), 4);
}

#[tokio::test]
async fn test_deploy_four_hosts_replicated() {
    let h = Harness::new();

    let response = h.service.deploy_ck(cluster_conf("c1", &HOSTS, true)).await;
    assert!(response.is_success());

    let stored = h.registry().get_cluster("c1").unwrap();
    let layout: Vec<Vec<String>> = stored
        .shards
        .iter()
        .map(|s| s.replicas.iter().map(|r| r.ip.clone()).collect())
        .collect();
    assert_eq!(
        layout,
        vec![
            vec!["192.168.0.1".to_string(), "192.168.0.2".to_string()],
            vec!["192.168.0.3".to_string(), "192.168.0.4".to_string()],
        ]
    );

    let written = h.executor.written.lock().clone();
    let metrika = written
        .iter()
        .find(|(host, path, _)| host == "192.168.0.4" && path.ends_with("metrika.xml"))
        .map(|(_, _, content)| content.clone())
        .unwrap();
    assert!(metrika.contains("<internal_replication>true</internal_replication>"));
    assert!(metrika.contains("<shard>2</shard>"));
}

#[tokio::test]
async fn test_install_failure_reports_phase() {
    let h = Harness::new();
    h.executor.fail_on("rpm -ivh");

    let response = h.service.deploy_ck(cluster_conf("c1", &HOSTS, false)).await;

    assert_eq!(response.code, RetCode::InstallPackageFail);
    assert_eq!(response.code.code(), "5013");
    assert!(h.registry().get_cluster("c1").is_none());
    assert_eq!(h.store.publish_count(), 0);
    assert!(h.executor.commands_matching("systemctl").is_empty());
    assert!(h.executor.written.lock().is_empty());
}

#[tokio::test]
async fn test_unhealthy_cluster_fails_check() {
    let h = Harness::new();
    h.connector.take_down("192.168.0.2");

    let response = h.service.deploy_ck(cluster_conf("c1", &HOSTS, false)).await;

    assert_eq!(response.code, RetCode::CheckPackageFail);
    assert!(response.message.contains("not healthy after 5 attempts"));
    assert!(h.registry().get_cluster("c1").is_none());
}

#[tokio::test]
async fn test_name_taken_by_another_instance_is_refused() {
    let mut remote = RegistrySnapshot { config_version: 7, ..Default::default() };
    remote.clusters.insert("c1".to_string(), cluster_conf("c1", &["10.1.0.1"], false));
    let payload = remote.marshal().unwrap();
    let h = Harness::with_store(Arc::new(MemoryConfigStore::with_payload(payload.clone())));

    // local view has not seen the remote entry yet, so preflight passes
    assert!(!h.registry().contains_cluster("c1"));
    let response = h.service.deploy_ck(cluster_conf("c1", &HOSTS, false)).await;

    assert_eq!(response.code, RetCode::InvalidParams);
    assert!(response.message.contains("cluster c1 already exists"), "{}", response.message);
    assert_eq!(h.store.publish_count(), 0);
    assert_eq!(h.store.payload(), payload);
    assert_eq!(h.registry().get_cluster("c1").unwrap().hosts, vec!["10.1.0.1"]);
}

#[tokio::test]
async fn test_concurrent_deploys_of_one_name_register_once() {
    let h = Harness::new();

    let (first, second) = tokio::join!(
        h.service.deploy_ck(cluster_conf("c1", &HOSTS[..2], false)),
        h.service.deploy_ck(cluster_conf("c1", &HOSTS[2..], false)),
    );

    let codes = [first.code, second.code];
    assert_eq!(codes.iter().filter(|c| **c == RetCode::Success).count(), 1, "{:?}", codes);
    assert_eq!(codes.iter().filter(|c| **c == RetCode::InvalidParams).count(), 1, "{:?}", codes);
    assert_eq!(h.store.publish_count(), 1);

    let winner = if first.is_success() { &HOSTS[..2] } else { &HOSTS[2..] };
    assert_eq!(h.registry().get_cluster("c1").unwrap().hosts, winner);
    let published = RegistrySnapshot::unmarshal(&h.store.payload()).unwrap();
    assert_eq!(published.config_version, 1);
    assert_eq!(published.clusters["c1"].hosts, winner);
}

#[tokio::test]
async fn test_unsaved_ssh_password_not_stored() {
    let h = Harness::new();
    let mut conf = cluster_conf("c1", &HOSTS[..2], false);
    conf.auth_type = SshAuth::PasswordNotSaved;

    assert!(h.service.deploy_ck(conf).await.is_success());

    assert_eq!(h.registry().get_cluster("c1").unwrap().ssh_password, "");
    let published = RegistrySnapshot::unmarshal(&h.store.payload()).unwrap();
    assert_eq!(published.clusters["c1"].ssh_password, "");
}

fn with_logic_member(h: &Harness) {
    let mut member = cluster_conf("c0", &["10.0.0.1", "10.0.0.2"], false);
    member.logic_cluster = Some("logic1".to_string());
    h.registry().register_cluster(member);

    h.connector.add_local("app", "events_local", "MergeTree");
    h.connector.add_distributed("app", "events", "logic1", "app", "events_local");
}

#[tokio::test]
async fn test_join_logic_cluster_copies_schema() {
    let h = Harness::new();
    with_logic_member(&h);

    let mut conf = cluster_conf("c1", &HOSTS, true);
    conf.logic_cluster = Some("logic1".to_string());
    let response = h.service.deploy_ck(conf).await;

    assert!(response.is_success(), "{:?}", response);
    assert!(response.warnings.is_empty());
    assert_eq!(
        h.registry().get_logic_cluster("logic1"),
        Some(vec!["c0".to_string(), "c1".to_string()])
    );

    let executed = h.connector.executed();
    assert!(executed.iter().all(|(host, _)| host == "192.168.0.1"));
    let statements: Vec<&str> = executed.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0], "CREATE DATABASE IF NOT EXISTS `app` ON CLUSTER `c1`");
    assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS app.events_local ON CLUSTER `c1`"));
    assert!(statements[1].contains("ReplicatedMergeTree("));
    assert!(statements[2].contains("Distributed('logic1', 'app', 'events_local', rand())"));

    let written = h.executor.written.lock().clone();
    let metrika = &written.iter().find(|(_, p, _)| p.ends_with("metrika.xml")).unwrap().2;
    assert!(metrika.contains("<logic1>"));
    assert!(metrika.contains("<host>10.0.0.2</host>"));
}

#[tokio::test]
async fn test_schema_failure_is_a_warning() {
    let h = Harness::new();
    with_logic_member(&h);
    h.connector.fail_statement("CREATE TABLE");

    let mut conf = cluster_conf("c1", &HOSTS, false);
    conf.logic_cluster = Some("logic1".to_string());
    let response = h.service.deploy_ck(conf).await;

    assert_eq!(response.code, RetCode::Success);
    assert_eq!(response.warnings, vec!["sync logic schema of logic1 to c1 failed".to_string()]);
    assert!(h.registry().contains_cluster("c1"));
    assert_eq!(h.store.publish_count(), 1);
}
