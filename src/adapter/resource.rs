//! Resource identity for adapted records
//!
//! Every row carries the Kubernetes identity of the workload that produced it.
//! A pod can back several services at once; its service cell then holds an
//! array literal such as `["ns/a","ns/b"]` and the row is attributed to each
//! service by emitting one resource per name.

use opentelemetry_proto::tonic::resource::v1::Resource;
use regex::Regex;

use super::{string_attr, INSTRUMENTATION_NAME};
use crate::data::Row;

pub const COL_NAMESPACE: &str = "namespace";
pub const COL_SERVICE: &str = "service";
pub const COL_POD: &str = "pod";
pub const COL_CONTAINER: &str = "container";

/// Parsed form of a service cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCell {
    Single(String),
    Multi(Vec<String>),
}

impl ServiceCell {
    /// Parse a raw service cell. Anything that is not a well-formed array
    /// literal of quoted names is a single service name.
    pub fn parse(cell: &str) -> Self {
        let trimmed = cell.trim();
        if let Some(inner) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let names: Option<Vec<String>> = inner
                .split(',')
                .map(|part| {
                    part.trim()
                        .strip_prefix('"')
                        .and_then(|p| p.strip_suffix('"'))
                        .filter(|name| !name.is_empty() && !name.contains('"'))
                        .map(str::to_string)
                })
                .collect();

            if let Some(names) = names {
                return ServiceCell::Multi(names);
            }
        }
        ServiceCell::Single(cell.to_string())
    }

    pub fn into_names(self) -> Vec<String> {
        match self {
            ServiceCell::Single(name) => vec![name],
            ServiceCell::Multi(names) => names,
        }
    }
}

/// Namespace, services and pod of one row, with namespace prefixes trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub namespace: String,
    pub services: Vec<String>,
    pub pod: String,
}

/// Builds resources for rows and applies the namespace/pod exclusions
#[derive(Debug, Clone)]
pub struct ResourceHelper {
    cluster_name: String,
    cluster_id: String,
    exclude_pods: Option<Regex>,
    exclude_namespaces: Option<Regex>,
}

impl ResourceHelper {
    /// Create a helper. Empty patterns are treated as absent.
    pub fn new(
        cluster_name: impl Into<String>,
        cluster_id: impl Into<String>,
        exclude_pods: Option<&str>,
        exclude_namespaces: Option<&str>,
    ) -> Result<Self, regex::Error> {
        let exclude_pods = compile_exclusion("pods", exclude_pods)?;
        let exclude_namespaces = compile_exclusion("namespaces", exclude_namespaces)?;

        Ok(Self {
            cluster_name: cluster_name.into(),
            cluster_id: cluster_id.into(),
            exclude_pods,
            exclude_namespaces,
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Read namespace, services and pod from a row
    pub fn extract_identity(&self, row: &Row) -> Identity {
        let namespace = row.string(COL_NAMESPACE);
        let prefix = format!("{}/", namespace);

        let services = ServiceCell::parse(&row.string(COL_SERVICE))
            .into_names()
            .into_iter()
            .map(|name| trim_prefix(&name, &prefix).to_string())
            .collect();
        let pod = trim_prefix(&row.string(COL_POD), &prefix).to_string();

        Identity {
            namespace,
            services,
            pod,
        }
    }

    /// Whether a namespace or pod is excluded from collection
    pub fn should_filter(&self, namespace: &str, pod: &str) -> bool {
        let namespace_excluded = self
            .exclude_namespaces
            .as_ref()
            .is_some_and(|re| re.is_match(namespace));
        let pod_excluded = self
            .exclude_pods
            .as_ref()
            .is_some_and(|re| re.is_match(pod));

        namespace_excluded || pod_excluded
    }

    /// One resource per service referenced by the row, or none if excluded
    pub fn build_resources(&self, row: &Row) -> Vec<Resource> {
        let identity = self.extract_identity(row);
        if self.should_filter(&identity.namespace, &identity.pod) {
            return Vec::new();
        }

        let shared = vec![
            string_attr("pixie.cluster.id", &self.cluster_id),
            string_attr("instrumentation.provider", INSTRUMENTATION_NAME),
            string_attr("k8s.namespace.name", &identity.namespace),
            string_attr("service.instance.id", &identity.pod),
            string_attr("k8s.pod.name", &identity.pod),
            string_attr("k8s.container.name", row.string(COL_CONTAINER)),
            string_attr("k8s.cluster.name", &self.cluster_name),
        ];

        identity
            .services
            .into_iter()
            .map(|service| {
                let mut attributes = shared.clone();
                attributes.push(string_attr("service.name", service));
                Resource {
                    attributes,
                    ..Default::default()
                }
            })
            .collect()
    }

    /// Read a cell and trim the row's own namespace prefix from it
    pub fn strip_namespace(row: &Row, column: &str) -> String {
        let prefix = format!("{}/", row.string(COL_NAMESPACE));
        trim_prefix(&row.string(column), &prefix).to_string()
    }
}

fn trim_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    value.strip_prefix(prefix).unwrap_or(value)
}

fn compile_exclusion(kind: &str, pattern: Option<&str>) -> Result<Option<Regex>, regex::Error> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(pattern) => {
            tracing::info!("Excluding {} matching regex '{}'", kind, pattern);
            Regex::new(pattern).map(Some)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::attr_str;
    use crate::data::Value;

    fn helper(pods: &str, namespaces: &str) -> ResourceHelper {
        ResourceHelper::new("demo", "cluster-1", Some(pods), Some(namespaces)).unwrap()
    }

    fn row(namespace: &str, service: &str, pod: &str) -> Row {
        Row::new()
            .with(COL_NAMESPACE, Value::String(namespace.into()))
            .with(COL_SERVICE, Value::String(service.into()))
            .with(COL_POD, Value::String(pod.into()))
            .with(COL_CONTAINER, Value::String("app".into()))
    }

    #[test]
    fn test_should_filter_empty() {
        let rh = helper("", "");
        assert!(!rh.should_filter("what", "ever"));

        let rh = ResourceHelper::new("demo", "cluster-1", None, None).unwrap();
        assert!(!rh.should_filter("what", "ever"));
    }

    #[test]
    fn test_should_filter_all() {
        assert!(helper("", ".*").should_filter("what", "ever"));
        assert!(helper(".*", "").should_filter("what", "ever"));
    }

    #[test]
    fn test_should_filter_namespace() {
        let rh = helper("", "^new$");
        assert!(!rh.should_filter("newrelic", ""));
        assert!(rh.should_filter("new", ""));
    }

    #[test]
    fn test_should_filter_pod() {
        let rh = helper("^new$", "");
        assert!(!rh.should_filter("", "newrelic"));
        assert!(rh.should_filter("", "new"));
    }

    #[test]
    fn test_should_filter_both() {
        let rh = helper("new", "relic");
        assert!(!rh.should_filter("new", "relic"));
        assert!(rh.should_filter("relic", "new"));
        assert!(rh.should_filter("relic", ""));
        assert!(rh.should_filter("", "new"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        assert!(ResourceHelper::new("demo", "id", Some("("), None).is_err());
    }

    #[test]
    fn test_parse_service_cell() {
        assert_eq!(
            ServiceCell::parse(r#"["ns/a","ns/b"]"#),
            ServiceCell::Multi(vec!["ns/a".into(), "ns/b".into()])
        );
        assert_eq!(
            ServiceCell::parse("ns/checkout"),
            ServiceCell::Single("ns/checkout".into())
        );
        assert_eq!(ServiceCell::parse(""), ServiceCell::Single("".into()));
        // Malformed literals stay a single opaque name
        assert_eq!(
            ServiceCell::parse(r#"["a",]"#),
            ServiceCell::Single(r#"["a",]"#.into())
        );
        assert_eq!(ServiceCell::parse("[]"), ServiceCell::Single("[]".into()));
    }

    #[test]
    fn test_extract_identity_trims_prefix() {
        let rh = helper("", "");
        let identity = rh.extract_identity(&row("shop", r#"["shop/a","shop/b"]"#, "shop/pod-1"));
        assert_eq!(identity.namespace, "shop");
        assert_eq!(identity.services, vec!["a", "b"]);
        assert_eq!(identity.pod, "pod-1");

        let identity = rh.extract_identity(&row("shop", "other/c", "pod-2"));
        assert_eq!(identity.services, vec!["other/c"]);
        assert_eq!(identity.pod, "pod-2");
    }

    #[test]
    fn test_build_resources_fans_out() {
        let rh = helper("", "");
        let resources = rh.build_resources(&row("ns", r#"["a","b"]"#, "ns/pod"));
        assert_eq!(resources.len(), 2);

        let names: Vec<_> = resources
            .iter()
            .map(|r| attr_str(&r.attributes, "service.name").unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        // Exactly one service.name each, everything else identical
        for resource in &resources {
            let count = resource
                .attributes
                .iter()
                .filter(|kv| kv.key == "service.name")
                .count();
            assert_eq!(count, 1);
        }
        assert_eq!(
            resources[0].attributes[..7],
            resources[1].attributes[..7]
        );
        assert_eq!(attr_str(&resources[0].attributes, "k8s.pod.name"), Some("pod"));
        assert_eq!(attr_str(&resources[0].attributes, "k8s.cluster.name"), Some("demo"));
        assert_eq!(attr_str(&resources[0].attributes, "pixie.cluster.id"), Some("cluster-1"));
    }

    #[test]
    fn test_build_resources_filtered() {
        let rh = helper("", "^kube-system$");
        assert!(rh.build_resources(&row("kube-system", "dns", "dns-1")).is_empty());
        assert_eq!(rh.build_resources(&row("default", "dns", "dns-1")).len(), 1);
    }

    #[test]
    fn test_strip_namespace() {
        let r = row("shop", "svc", "pod").with("parent_service", Value::String("shop/cart".into()));
        assert_eq!(ResourceHelper::strip_namespace(&r, "parent_service"), "cart");
        assert_eq!(ResourceHelper::strip_namespace(&r, "missing"), "");
    }
}
