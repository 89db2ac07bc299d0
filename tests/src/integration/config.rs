//! # Configuration
//!
//! Config values resolved from the environment by host suffix, and the
//! `config-refresh` control endpoint.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{ctx, shutdown_all, testing_connector};
    use mb_04_connector::{ConfigSpec, EnvSource, PublishOptions};
    use parking_lot::Mutex;
    use shared_bus::InMemoryBus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_most_specific_host_suffix_wins() {
        let bus = InMemoryBus::new();
        let con = testing_connector("www.example.com", &bus);
        con.set_env(EnvSource::from_vars([
            ("MICROBUS_WWWEXAMPLECOM_AAA", "111"),
            ("MICROBUS_EXAMPLECOM_AAA", "XXX"),
            ("MICROBUS_EXAMPLECOM_BBB", "222"),
            ("MICROBUS_ALL_DDD", "1"),
        ]))
        .unwrap();
        for name in ["aaa", "bbb", "ccc", "ddd"] {
            con.define_config(name, ConfigSpec::new()).unwrap();
        }
        con.startup().await.unwrap();

        assert_eq!(con.config("aaa").as_deref(), Some("111"));
        assert_eq!(con.config("bbb").as_deref(), Some("222"));
        assert!(con.config("ccc").is_none());
        assert_eq!(con.config("ddd").as_deref(), Some("1"));

        shutdown_all(&[con]).await;
    }

    #[tokio::test]
    async fn test_env_yaml_applies_to_other_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, "all:\n  Greeting: hello\nexample.org:\n  Greeting: howdy\n").unwrap();

        let bus = InMemoryBus::new();
        let org = testing_connector("svc.example.org", &bus);
        let net = testing_connector("svc.example.net", &bus);
        for con in [&org, &net] {
            con.set_env(EnvSource::new().with_env_file(&path).unwrap()).unwrap();
            con.define_config("Greeting", ConfigSpec::new()).unwrap();
            con.startup().await.unwrap();
        }

        assert_eq!(org.config("greeting").as_deref(), Some("howdy"));
        assert_eq!(net.config("greeting").as_deref(), Some("hello"));

        shutdown_all(&[org, net]).await;
    }

    #[tokio::test]
    async fn test_config_refresh_endpoint_rereads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, "all:\n  Level: \"1\"\n").unwrap();

        let bus = InMemoryBus::new();
        let con = testing_connector("refresh.example", &bus);
        con.set_env(EnvSource::new().with_env_file(&path).unwrap()).unwrap();
        con.define_config("Level", ConfigSpec::new().validation("int").unwrap())
            .unwrap();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        con.on_config_changed(move |changed| sink.lock().extend_from_slice(changed));
        con.startup().await.unwrap();
        assert_eq!(con.config("level").as_deref(), Some("1"));

        std::fs::write(&path, "all:\n  Level: \"2\"\n").unwrap();
        let res = con
            .request(&ctx(), PublishOptions::get("https://refresh.example:888/config-refresh"))
            .await
            .unwrap();
        let body: serde_json::Value = res.parse_json().unwrap();
        assert_eq!(body["changed"], serde_json::json!(["Level"]));
        assert_eq!(con.config("level").as_deref(), Some("2"));
        assert_eq!(*changes.lock(), vec!["Level".to_string()]);

        shutdown_all(&[con]).await;
    }
}
