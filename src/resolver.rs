//! Pod address resolution
//!
//! Parses synthetic pod hostnames into a pod identity and target port.
//!
//! # Address Format
//! ```text
//! <name>.<namespace>[.<subdomain>].pod.cluster.local[:<port>]
//! ```
//!
//! # Examples
//! ```text
//! foo.bar.pod.cluster.local:9200
//! elasticsearch-0.default.pod.cluster.local
//! ```

use crate::errors::{PodlinkError, Result};

/// The fixed hostname suffix that marks an address as a pod address.
const POD_SUFFIX: [&str; 3] = ["pod", "cluster", "local"];

/// Identity of a pod within the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodAddress {
    /// Kubernetes namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

/// A fully resolved synthetic address: pod identity plus target port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// The pod the address points at
    pub pod: PodAddress,
    /// Target port on the pod, empty when the address carried no `:<port>` suffix
    pub target_port: String,
}

/// Resolve a synthetic pod address into its components
///
/// Purely syntactic; never performs network or cluster lookups. The hostname
/// must end with the literal `pod.cluster.local` suffix and carry the pod name
/// and namespace as the two labels in front of it. One extra subdomain label
/// between the namespace and the suffix is accepted and ignored.
///
/// # Examples
/// ```
/// use podlink::resolver::resolve_pod_addr;
///
/// let target = resolve_pod_addr("foo.bar.pod.cluster.local:9200").unwrap();
/// assert_eq!(target.pod.name, "foo");
/// assert_eq!(target.pod.namespace, "bar");
/// assert_eq!(target.target_port, "9200");
/// ```
pub fn resolve_pod_addr(addr: &str) -> Result<ResolvedTarget> {
    // Split off the optional :<port> suffix. Hostname labels never contain
    // a colon, so the rightmost one is the port separator.
    let (host, target_port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PodlinkError::UnsupportedAddress(addr.to_string()));
            }
            (host, port.to_string())
        }
        None => (addr, String::new()),
    };

    let labels: Vec<&str> = host.split('.').collect();

    // name + namespace + the three suffix labels is the minimum shape.
    if labels.len() < POD_SUFFIX.len() + 2 {
        return Err(PodlinkError::UnsupportedAddress(addr.to_string()));
    }

    let (ident, suffix) = labels.split_at(labels.len() - POD_SUFFIX.len());
    if suffix != POD_SUFFIX {
        return Err(PodlinkError::UnsupportedAddress(addr.to_string()));
    }

    // At most one ignored subdomain label after namespace.
    if ident.len() > 3 {
        return Err(PodlinkError::UnsupportedAddress(addr.to_string()));
    }

    let name = ident[0];
    let namespace = ident[1];
    if name.is_empty() || namespace.is_empty() {
        return Err(PodlinkError::UnsupportedAddress(addr.to_string()));
    }

    Ok(ResolvedTarget {
        pod: PodAddress {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        target_port,
    })
}
