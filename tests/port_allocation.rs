//! Port Conflict & Allocation Engine tests
//!
//! Never rely on a fixed host port being free: use the in-memory probe, or
//! ports handed out by the OS for `127.0.0.1:0`.

use deck_env::ports::{
    default_port, get_resolution_suggestions, validate_port, CheckMode, ConflictSeverity,
    MockProbe, NoProcessLookup, PortEngine, PortError, PortRole, Protocol, ResolutionKind,
    SystemProbe,
};
use deck_env::{CancellationToken, ProjectType};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn mock_engine(occupied: impl IntoIterator<Item = u16>) -> PortEngine {
    PortEngine::new(
        Arc::new(MockProbe::new(occupied)),
        Arc::new(NoProcessLookup),
        100,
        CancellationToken::new(),
    )
}

fn system_engine() -> PortEngine {
    PortEngine::new(
        Arc::new(SystemProbe::new(CheckMode::Bind, Duration::from_millis(200))),
        Arc::new(NoProcessLookup),
        100,
        CancellationToken::new(),
    )
}

// =============================================================================
// FindAvailablePort
// =============================================================================

#[test]
fn test_find_available_port_properties() {
    for p in [1024u16, 5000, 40000] {
        let free = mock_engine([]);
        assert_eq!(free.find_available_port(p, p, p + 10, Protocol::Tcp), Ok(p));

        let busy = mock_engine([p]);
        let q = busy.find_available_port(p, p, p + 10, Protocol::Tcp).unwrap();
        assert!(q > p && q <= p + 10);

        let full = mock_engine(p..=p + 10);
        assert_eq!(
            full.find_available_port(p, p, p + 10, Protocol::Tcp),
            Err(PortError::NoAvailablePort { min: p, max: p + 10 })
        );
    }
}

#[test]
fn test_scan_starts_at_range_min() {
    let engine = mock_engine([5050]);
    assert_eq!(engine.find_available_port(5050, 5000, 5100, Protocol::Tcp), Ok(5000));
}

#[test]
fn test_real_listener_is_skipped() {
    let listener = TcpListener::bind("0.0.0.0:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let max = port.saturating_add(20);

    let found = system_engine()
        .find_available_port(port, port, max, Protocol::Tcp)
        .unwrap();
    assert_ne!(found, port);
    assert!(found > port && found <= max);
}

// =============================================================================
// CheckPorts / conflicts
// =============================================================================

#[test]
fn test_check_ports_real_sockets_in_order() {
    let a = TcpListener::bind("0.0.0.0:0").unwrap();
    let b = TcpListener::bind("0.0.0.0:0").unwrap();
    let busy_a = a.local_addr().unwrap().port();
    let busy_b = b.local_addr().unwrap().port();

    let results = system_engine()
        .check_ports(&[busy_b, busy_a], Protocol::Tcp)
        .unwrap();
    assert_eq!(results[0].port, busy_b);
    assert_eq!(results[1].port, busy_a);
    assert!(results.iter().all(|r| !r.available));
}

#[test]
fn test_conflict_on_real_listener() {
    let listener = TcpListener::bind("0.0.0.0:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let conflict = system_engine().detect_port_conflict(port, Protocol::Tcp);
    assert!(conflict.has_conflict);
    assert_ne!(conflict.severity, ConflictSeverity::None);

    let kinds: Vec<_> = get_resolution_suggestions(&conflict, None)
        .into_iter()
        .map(|s| s.kind)
        .collect();
    assert_eq!(kinds[0], ResolutionKind::UseAlternativePort);
    assert_eq!(kinds[1], ResolutionKind::ModifyConfiguration);
    assert!(!kinds.contains(&ResolutionKind::StopConflictingProcess));
}

// =============================================================================
// AllocateProjectPorts
// =============================================================================

#[test]
fn test_avalonia_devserver_near_5000() {
    let result = mock_engine([])
        .allocate_project_ports(ProjectType::Avalonia, &[PortRole::DevServer])
        .unwrap();
    assert_eq!(result.allocated_ports[&PortRole::DevServer], 5000);
}

#[test]
fn test_allocated_ports_unique_under_pressure() {
    // Only 8100 is free around the Api default; the Debug window is full
    let occupied = (7980..=8180).filter(|p| *p != 8100).chain(2245..=2445);
    let result = mock_engine(occupied)
        .allocate_project_ports(ProjectType::Rust, &[PortRole::Api, PortRole::Debug])
        .unwrap();

    assert_eq!(result.allocated_ports[&PortRole::Api], 8100);
    assert_eq!(result.failed_allocations, vec![PortRole::Debug]);
}

#[test]
fn test_unsupported_type_partial_result() {
    let roles = [PortRole::Api, PortRole::Debug, PortRole::Database];
    let result = mock_engine([])
        .allocate_project_ports(ProjectType::Unknown, &roles)
        .unwrap();

    assert!(result.allocated_ports.is_empty());
    assert_eq!(result.failed_allocations, roles.to_vec());
}

#[test]
fn test_allocation_cancelled() {
    let cancel = CancellationToken::new();
    let engine = PortEngine::new(
        Arc::new(MockProbe::default()),
        Arc::new(NoProcessLookup),
        100,
        cancel.clone(),
    );
    cancel.cancel();

    assert_eq!(
        engine.allocate_project_ports(ProjectType::DotNet, &[PortRole::Api]),
        Err(PortError::Cancelled)
    );
}

#[test]
fn test_default_table() {
    assert_eq!(default_port(ProjectType::DotNet, PortRole::Api), Some(5000));
    assert_eq!(default_port(ProjectType::DotNet, PortRole::Debug), Some(5001));
    assert_eq!(default_port(ProjectType::Unknown, PortRole::Api), None);
}

// =============================================================================
// ValidatePort
// =============================================================================

#[test]
fn test_validate_port() {
    assert!(!validate_port(0, false).is_valid);
    assert!(!validate_port(70000, false).is_valid);

    let privileged = validate_port(443, true);
    assert!(privileged.is_valid);
    assert!(privileged.requires_privilege);
    assert!(privileged.suggested_alternatives.iter().all(|p| *p >= 1024));
}
