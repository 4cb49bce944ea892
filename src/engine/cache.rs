use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Engine, FINGERPRINT_LABEL_KEY, LAYER_COMMENT};
use crate::docker::CommitRequest;
use crate::error::{EngineError, Result};

/// Commit tags are UTC timestamps at second precision.
const TAG_FORMAT: &str = "%Y%m%d%H%M%S";

/// Image config applied when a role's container is committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub labels: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
}

impl ImageMetadata {
    /// Dockerfile instructions that apply this metadata, labels excluded.
    pub fn changes(&self) -> Vec<String> {
        let mut changes = Vec::new();
        for (key, value) in &self.environment {
            changes.push(format!("ENV {key}={}", json_string(value)));
        }
        if let Some(entrypoint) = &self.entrypoint {
            changes.push(format!("ENTRYPOINT {}", json_list(entrypoint)));
        }
        if let Some(command) = &self.command {
            changes.push(format!("CMD {}", json_list(command)));
        }
        if let Some(dir) = &self.working_dir {
            changes.push(format!("WORKDIR {dir}"));
        }
        if let Some(user) = &self.user {
            changes.push(format!("USER {user}"));
        }
        for port in &self.ports {
            changes.push(format!("EXPOSE {port}"));
        }
        if !self.volumes.is_empty() {
            changes.push(format!("VOLUME {}", json_list(&self.volumes)));
        }
        changes
    }
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn json_list(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}

impl Engine {
    /// The single image carrying `fingerprint`, intermediate images included.
    ///
    /// More than one match is an error: the cache never picks for the caller.
    pub fn image_id_by_fingerprint(&self, fingerprint: &str) -> Result<Option<String>> {
        let mut ids = self
            .backend
            .images_by_label(FINGERPRINT_LABEL_KEY, fingerprint)?;
        ids.sort();
        ids.dedup();
        match ids.len() {
            0 => Ok(None),
            1 => Ok(ids.pop()),
            _ => Err(EngineError::AmbiguousFingerprint {
                fingerprint: fingerprint.to_string(),
                candidates: ids,
            }),
        }
    }

    pub fn image_id_by_tag(&self, tag: &str) -> Result<Option<String>> {
        Ok(self.backend.image_id_by_tag(tag)?)
    }

    pub fn latest_image_id_for_service(&self, service_name: &str) -> Result<Option<String>> {
        let tag = format!("{}:latest", self.image_name_for_service(service_name));
        self.image_id_by_tag(&tag)
    }

    /// Commit a container that has had a role applied as a new image layer.
    ///
    /// The image goes to the service's repository, tagged with the current
    /// UTC time, and always carries the fingerprint label and the layer
    /// comment. Returns the new image id.
    pub fn commit_role_as_layer(
        &self,
        container_id: &str,
        service_name: &str,
        fingerprint: &str,
        metadata: &ImageMetadata,
    ) -> Result<String> {
        self.commit_role_as_layer_at(container_id, service_name, fingerprint, metadata, Utc::now())
    }

    pub(crate) fn commit_role_as_layer_at(
        &self,
        container_id: &str,
        service_name: &str,
        fingerprint: &str,
        metadata: &ImageMetadata,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let mut labels = metadata.labels.clone();
        labels.insert(FINGERPRINT_LABEL_KEY.to_string(), fingerprint.to_string());

        let request = CommitRequest {
            repository: self.image_name_for_service(service_name),
            tag: self.reserve_commit_tag(service_name, now),
            message: LAYER_COMMENT.to_string(),
            labels,
            changes: metadata.changes(),
        };
        debug!(container = container_id, ?request, "committing layer");
        Ok(self.backend.commit_container(container_id, &request)?)
    }

    /// Tag for the next commit of `service_name`.
    ///
    /// Normally `now` at second precision. A second commit for the same
    /// service within that second gets the next free second instead of
    /// silently retagging the first image.
    fn reserve_commit_tag(&self, service_name: &str, now: DateTime<Utc>) -> String {
        let now = now
            .duration_trunc(Duration::seconds(1))
            .unwrap_or(now);
        let mut tags = self.commit_tags.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = match tags.get(service_name) {
            Some(last) if *last >= now => *last + Duration::seconds(1),
            _ => now,
        };
        tags.insert(service_name.to_string(), stamp);
        stamp.format(TAG_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeBackend};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn engine() -> (Engine, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        (Engine::new("myapp", backend.clone()), backend)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, m, s).unwrap()
    }

    fn last_commit(backend: &FakeBackend) -> CommitRequest {
        backend
            .calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                Call::Commit { request, .. } => Some(request),
                _ => None,
            })
            .expect("no commit recorded")
    }

    #[test]
    fn fingerprint_with_no_match_is_absent() {
        let (engine, _) = engine();
        assert_eq!(engine.image_id_by_fingerprint("abc").unwrap(), None);
    }

    #[test]
    fn fingerprint_with_one_match_returns_it() {
        let (engine, backend) = engine();
        backend.add_image("sha256:1", &[], &[(FINGERPRINT_LABEL_KEY, "abc")]);
        backend.add_image("sha256:2", &[], &[(FINGERPRINT_LABEL_KEY, "other")]);
        assert_eq!(
            engine.image_id_by_fingerprint("abc").unwrap(),
            Some("sha256:1".to_string())
        );
    }

    #[test]
    fn fingerprint_with_two_matches_is_ambiguous() {
        let (engine, backend) = engine();
        backend.add_image("sha256:1", &[], &[(FINGERPRINT_LABEL_KEY, "abc")]);
        backend.add_image("sha256:2", &["myapp-web:latest"], &[(FINGERPRINT_LABEL_KEY, "abc")]);
        match engine.image_id_by_fingerprint("abc") {
            Err(EngineError::AmbiguousFingerprint {
                fingerprint,
                candidates,
            }) => {
                assert_eq!(fingerprint, "abc");
                assert_eq!(candidates, vec!["sha256:1", "sha256:2"]);
            }
            other => panic!("expected ambiguous error, got {other:?}"),
        }
    }

    #[test]
    fn same_image_listed_twice_is_one_match() {
        let (engine, backend) = engine();
        // `docker images --all` lists an image once per tag.
        backend.add_image("sha256:1", &["a:1"], &[(FINGERPRINT_LABEL_KEY, "abc")]);
        backend.add_image("sha256:1", &["a:2"], &[(FINGERPRINT_LABEL_KEY, "abc")]);
        assert_eq!(
            engine.image_id_by_fingerprint("abc").unwrap(),
            Some("sha256:1".to_string())
        );
    }

    #[test]
    fn tag_lookups() {
        let (engine, backend) = engine();
        backend.add_image("sha256:web", &["myapp-web:latest"], &[]);
        assert_eq!(
            engine.image_id_by_tag("myapp-web:latest").unwrap(),
            Some("sha256:web".to_string())
        );
        assert_eq!(
            engine.latest_image_id_for_service("web").unwrap(),
            Some("sha256:web".to_string())
        );
        assert_eq!(engine.latest_image_id_for_service("db").unwrap(), None);
    }

    #[test]
    fn commit_sets_label_comment_and_timestamp_tag() {
        let (engine, backend) = engine();
        let ctr = backend.add_container("myapp_web", "running");
        let metadata = ImageMetadata {
            labels: BTreeMap::from([("owner".to_string(), "ops".to_string())]),
            ..ImageMetadata::default()
        };
        let id = engine
            .commit_role_as_layer_at(&ctr, "web", "fp-123", &metadata, at(3, 4, 5))
            .unwrap();

        let request = last_commit(&backend);
        assert_eq!(request.repository, "myapp-web");
        assert_eq!(request.tag, "20240102030405");
        assert_eq!(request.message, LAYER_COMMENT);
        assert_eq!(request.labels[FINGERPRINT_LABEL_KEY], "fp-123");
        assert_eq!(request.labels["owner"], "ops");

        let image = backend.image(&id).unwrap();
        assert_eq!(image.tags, vec!["myapp-web:20240102030405"]);
        assert_eq!(image.labels[FINGERPRINT_LABEL_KEY], "fp-123");
    }

    #[test]
    fn fingerprint_label_wins_over_metadata_label() {
        let (engine, backend) = engine();
        let ctr = backend.add_container("myapp_web", "running");
        let metadata = ImageMetadata {
            labels: BTreeMap::from([(FINGERPRINT_LABEL_KEY.to_string(), "stale".to_string())]),
            ..ImageMetadata::default()
        };
        engine
            .commit_role_as_layer(&ctr, "web", "fresh", &metadata)
            .unwrap();
        assert_eq!(last_commit(&backend).labels[FINGERPRINT_LABEL_KEY], "fresh");
    }

    #[test]
    fn commits_in_the_same_second_get_distinct_tags() {
        let (engine, backend) = engine();
        let ctr = backend.add_container("myapp_web", "running");
        let meta = ImageMetadata::default();
        let now = at(3, 4, 5);

        engine.commit_role_as_layer_at(&ctr, "web", "a", &meta, now).unwrap();
        let first = last_commit(&backend).tag;
        engine.commit_role_as_layer_at(&ctr, "web", "b", &meta, now).unwrap();
        let second = last_commit(&backend).tag;
        // Another service is unaffected.
        engine.commit_role_as_layer_at(&ctr, "db", "c", &meta, now).unwrap();
        let other = last_commit(&backend).tag;

        assert_eq!(first, "20240102030405");
        assert_eq!(second, "20240102030406");
        assert_eq!(other, "20240102030405");
    }

    #[test]
    fn commit_of_missing_container_is_propagated() {
        let (engine, _) = engine();
        let err = engine
            .commit_role_as_layer("ghost", "web", "fp", &ImageMetadata::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[test]
    fn metadata_changes() {
        let metadata = ImageMetadata {
            environment: BTreeMap::from([("PATH".to_string(), "/usr/bin".to_string())]),
            command: Some(vec!["nginx".into(), "-g".into(), "daemon off;".into()]),
            working_dir: Some("/srv".into()),
            user: Some("www".into()),
            ports: vec!["80/tcp".into()],
            volumes: vec!["/data".into()],
            ..ImageMetadata::default()
        };
        assert_eq!(
            metadata.changes(),
            vec![
                r#"ENV PATH="/usr/bin""#,
                r#"CMD ["nginx","-g","daemon off;"]"#,
                "WORKDIR /srv",
                "USER www",
                "EXPOSE 80/tcp",
                r#"VOLUME ["/data"]"#,
            ]
        );
    }
}
