//! Blocking DNS bridge for the `resolve()` DSL function. The main scraping
//! pipeline resolves hosts asynchronously (`scraping::dns`, built on the
//! same `hickory-resolver` client); this wrapper exists only because DSL
//! functions are plain synchronous calls.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use super::functions::DslError;

pub fn resolve_blocking(host: &str, record_type: &str) -> Result<String, DslError> {
    let host = host.to_string();
    let record_type = record_type.to_lowercase();
    let join = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DslError(e.to_string()))?;
        rt.block_on(resolve_async(&host, &record_type))
    });
    join.join().map_err(|_| DslError("resolve: worker thread panicked".to_string()))?
}

/// Full breadth named by the DSL spec (§4.3, §11.4): A/AAAA/CNAME/NS/TXT/
/// SRV/PTR/MX/SOA/CAA against the resolver's fixed configuration. The
/// crawl driver's own post-processing (§4.1) stays narrower (NS/MX/TXT/
/// CNAME) — this breadth is only for the DSL-level `resolve()` call.
async fn resolve_async(host: &str, record_type: &str) -> Result<String, DslError> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let values: Vec<String> = match record_type {
        "a" | "" => resolver
            .ipv4_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|ip| ip.to_string())
            .collect(),
        "aaaa" => resolver
            .ipv6_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|ip| ip.to_string())
            .collect(),
        "mx" => resolver
            .mx_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|mx| mx.exchange().to_string())
            .collect(),
        "txt" => resolver
            .txt_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|txt| txt.to_string())
            .collect(),
        "ns" => resolver
            .ns_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|ns| ns.to_string())
            .collect(),
        "srv" => resolver
            .srv_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|srv| format!("{}:{}", srv.target(), srv.port()))
            .collect(),
        "soa" => resolver
            .soa_lookup(host)
            .await
            .map_err(|e| DslError(e.to_string()))?
            .iter()
            .map(|soa| soa.mname().to_string())
            .collect(),
        "ptr" => {
            let ip: std::net::IpAddr = host
                .parse()
                .map_err(|_| DslError(format!("resolve: {host:?} is not a valid IP for ptr lookup")))?;
            resolver
                .reverse_lookup(ip)
                .await
                .map_err(|e| DslError(e.to_string()))?
                .iter()
                .map(|name| name.to_string())
                .collect()
        }
        "cname" | "caa" => {
            let record_type = if record_type == "cname" {
                hickory_resolver::proto::rr::RecordType::CNAME
            } else {
                hickory_resolver::proto::rr::RecordType::CAA
            };
            resolver
                .lookup(host, record_type)
                .await
                .map_err(|e| DslError(e.to_string()))?
                .iter()
                .map(|r| r.to_string())
                .collect()
        }
        other => return Err(DslError(format!("resolve: unsupported record type {other:?}"))),
    };
    Ok(values.join(","))
}
