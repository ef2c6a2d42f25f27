//! `mpkbox probe`: what this build and this machine support.

use anyhow::Result;
use mpkbox_domain::{backend, get_current_domain, pkru_support, Backend, MAX_DOMAINS};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub arch: &'static str,
    pub os: &'static str,
    pub pku_feature: bool,
    pub pkru_available: bool,
    pub pkru_unavailable_reason: Option<&'static str>,
    pub backend: Backend,
    pub current_domain: u32,
    pub max_domains: u32,
    pub page_size: usize,
}

pub fn collect() -> ProbeReport {
    let support = pkru_support();
    ProbeReport {
        arch: std::env::consts::ARCH,
        os: std::env::consts::OS,
        pku_feature: cfg!(feature = "pku"),
        pkru_available: support.is_ok(),
        pkru_unavailable_reason: support.err(),
        backend: backend(),
        current_domain: get_current_domain().raw(),
        max_domains: MAX_DOMAINS,
        page_size: mpkbox_hostcall::page_size(),
    }
}

pub fn cmd_probe(json: bool) -> Result<()> {
    let report = collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("mpkbox probe");
    println!("============");
    println!("  Target:         {}-{}", report.arch, report.os);
    println!("  pku feature:    {}", if report.pku_feature { "on" } else { "off" });
    match report.pkru_unavailable_reason {
        None => println!("  PKRU:           available"),
        Some(reason) => println!("  PKRU:           unavailable ({reason})"),
    }
    println!("  Backend:        {:?}", report.backend);
    println!("  Current domain: {}", report.current_domain);
    println!("  Domains:        {}", report.max_domains);
    println!("  Page size:      {} bytes", report.page_size);
    Ok(())
}
