//! Host and network address registry.

use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use caseledger::{Case, CaseConfig, EdgeAttribution, HostAddressType};

#[test]
fn test_host_addresses_and_usage() {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let addresses = case.addresses();

    let (image, root, abc) = case
        .transact(|tx| {
            let image = case.content().add_data_source(tx, "image.E01", None)?;
            let root = case.content().add_content(tx, image.id, "")?;
            case.content().add_content(tx, image.id, "Windows")?;
            let abc = case.content().add_content(tx, image.id, "abc.txt")?;
            Ok((image.id, root.id, abc.id))
        })
        .unwrap();

    let ipv4_str = "11.22.33.44";
    let ipv6_str = "2001:0db8:85a3:0000:0000:8a2e:0370:6666";
    let hostname_str = "basis.com";

    let (ipv4, ipv6, hostname) = case
        .transact(|tx| {
            Ok((
                addresses.create_address(tx, HostAddressType::Ipv4, ipv4_str)?,
                addresses.create_address(tx, HostAddressType::DnsAuto, ipv6_str)?,
                addresses.create_address(tx, HostAddressType::DnsAuto, hostname_str)?,
            ))
        })
        .unwrap();
    assert_eq!(ipv4.address, ipv4_str);
    assert!(ipv6.address.eq_ignore_ascii_case(ipv6_str));
    assert_eq!(ipv6.address_type, HostAddressType::Ipv6);
    assert_eq!(hostname.address, hostname_str);
    assert_eq!(hostname.address_type, HostAddressType::Hostname);

    let found = addresses
        .get_address(HostAddressType::Ipv4, ipv4_str)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, ipv4.id);

    // Same text, auto-typed: same row.
    let again = case
        .transact(|tx| addresses.create_address(tx, HostAddressType::DnsAuto, ipv4_str))
        .unwrap();
    assert_eq!(again.id, ipv4.id);

    let host = case
        .transact(|tx| Ok(case.hosts().create_host(tx, "TestHostAddress")?.id))
        .unwrap();
    let seen = EdgeAttribution {
        time: Utc.timestamp_opt(0, 0).single(),
        source: Some(image),
    };
    case.transact(|tx| {
        addresses.assign_host_to_address(tx, host, ipv4.id, seen)?;
        addresses.assign_host_to_address(tx, host, ipv4.id, seen)?;
        addresses.add_hostname_ip_mapping(tx, hostname.id, ipv4.id, seen)
    })
    .unwrap();
    assert_eq!(addresses.addresses_assigned_to(host).unwrap().len(), 1);

    let ips = addresses.ip_addresses_for("BASIS.com").unwrap();
    assert_eq!(ips.len(), 1);
    assert_eq!(ips[0].id, ipv4.id);
    let names = addresses.hostnames_for_ip(ipv4_str).unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].id, hostname.id);

    case.transact(|tx| {
        for address in [ipv4.id, ipv6.id, hostname.id, ipv4.id] {
            addresses.add_usage(tx, abc, address)?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(addresses.addresses_used_by_content(abc).unwrap().len(), 3);
    assert!(addresses.addresses_used_by_content(root).unwrap().is_empty());
    assert_eq!(addresses.addresses_used_on_data_source(image).unwrap().len(), 3);
}

#[test]
fn test_mapping_requires_hostname_and_ip() {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let addresses = case.addresses();
    let err = case
        .transact(|tx| {
            let mac = addresses.create_address(tx, HostAddressType::Ethernet, "00:1A:2B:3C:4D:5E")?;
            let ip = addresses.create_address(tx, HostAddressType::Ipv4, "10.0.0.1")?;
            addresses.add_hostname_ip_mapping(tx, mac.id, ip.id, EdgeAttribution::default())
        })
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_merged_hosts_move_address_assignments() {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let addresses = case.addresses();
    let (src, dest, ip) = case
        .transact(|tx| {
            let src = case.hosts().create_host(tx, "old-name")?.id;
            let dest = case.hosts().create_host(tx, "new-name")?.id;
            let ip = addresses.create_address(tx, HostAddressType::DnsAuto, "192.168.1.20")?;
            addresses.assign_host_to_address(tx, src, ip.id, EdgeAttribution::default())?;
            Ok((src, dest, ip.id))
        })
        .unwrap();

    case.transact(|tx| case.hosts().merge_hosts(tx, src, dest))
        .unwrap();

    assert!(addresses.addresses_assigned_to(src).unwrap().is_empty());
    let moved = addresses.addresses_assigned_to(dest).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, ip);

    let err = case
        .transact(|tx| addresses.assign_host_to_address(tx, src, ip, EdgeAttribution::default()))
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(case.hosts().hosts().unwrap().len(), 1);
}

#[test]
fn test_data_source_added_during_host_merge_follows_the_merge() {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let (src, dest) = case
        .transact(|tx| {
            Ok((
                case.hosts().create_host(tx, "h1")?.id,
                case.hosts().create_host(tx, "h2")?.id,
            ))
        })
        .unwrap();

    let mut pending = case.begin();
    let ds = case
        .content()
        .add_data_source(&mut pending, "img", Some(src))
        .unwrap();

    thread::scope(|s| {
        let merger = s.spawn(|| case.transact(|tx| case.hosts().merge_hosts(tx, src, dest)));
        // Give the merge a chance to run ahead of the pending data source.
        thread::sleep(Duration::from_millis(50));
        pending.commit().unwrap();
        merger.join().unwrap().unwrap();
    });

    let host = case.hosts().host_of_data_source(ds.id).unwrap().unwrap();
    assert_eq!(host.id, dest);
    assert!(case.hosts().data_sources(src).unwrap().is_empty());
}

#[test]
fn test_data_source_on_merged_host_rejected() {
    let case = Case::in_memory(CaseConfig::default()).unwrap();
    let (src, dest) = case
        .transact(|tx| {
            Ok((
                case.hosts().create_host(tx, "laptop")?.id,
                case.hosts().create_host(tx, "LAPTOP-01")?.id,
            ))
        })
        .unwrap();
    case.transact(|tx| case.hosts().merge_hosts(tx, src, dest))
        .unwrap();

    let err = case
        .transact(|tx| case.content().add_data_source(tx, "late.E01", Some(src)))
        .unwrap_err();
    assert!(err.is_validation());
}
