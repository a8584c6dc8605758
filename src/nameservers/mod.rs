//! Default implementations of [crate::nameserver::Nameserver]

pub mod resolv_conf;
