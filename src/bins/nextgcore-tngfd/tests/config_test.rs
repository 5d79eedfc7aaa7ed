//! Configuration file loading

mod common;

use std::net::Ipv4Addr;

use nextgcore_tngfd::config::{ConfigError, DEFAULT_XFRM_INTERFACE_ID, DEFAULT_XFRM_INTERFACE_NAME};
use nextgcore_tngfd::TngfConfig;

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("tngf-{}.yaml", std::process::id()));
    std::fs::write(&path, common::TNGF_CONFIG).unwrap();

    let settings = TngfConfig::load(&path).and_then(|config| config.settings()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(settings.amf_addresses, vec![common::amf_addr()]);
    assert_eq!(settings.ipsec_gateway_address, Ipv4Addr::new(10, 45, 0, 1));
    assert_eq!(settings.ue_subnet.prefix_len, 24);
    assert_eq!(settings.nas_tcp_port, 20000);
    assert_eq!(settings.radius_secret, b"integration".to_vec());
    assert_eq!(settings.xfrm_interface_name, DEFAULT_XFRM_INTERFACE_NAME);
    assert_eq!(settings.xfrm_interface_id, DEFAULT_XFRM_INTERFACE_ID);
    assert_eq!(settings.supported_ta_list[0].tac, [0x00, 0x00, 0x07]);
}

#[test]
fn test_missing_file() {
    let err = TngfConfig::load("/nonexistent/tngf.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_yaml() {
    let err = TngfConfig::from_yaml("configuration: [").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}
