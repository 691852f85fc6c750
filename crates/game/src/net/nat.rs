/// Gateway port-forwarding collaborator. Hosts behind a NAT ask their
/// router to forward the session port before listening; everything about
/// how that request travels (UPnP, SOAP, vendor APIs) lives behind this
/// trait.
pub trait PortMapping {
    /// Ask the gateway to forward `external_port` to `internal_port`.
    /// Returns false if the mapping could not be established; hosting may
    /// still proceed on the local bind.
    fn establish_port_mapping(
        &mut self,
        name: &str,
        internal_port: u16,
        external_port: u16,
    ) -> bool;
}

/// Used when no gateway negotiation is wanted (LAN play, tests).
#[derive(Debug, Default)]
pub struct NoMapping;

impl PortMapping for NoMapping {
    fn establish_port_mapping(
        &mut self,
        name: &str,
        internal_port: u16,
        external_port: u16,
    ) -> bool {
        log::debug!(
            "port mapping skipped for {} ({} -> {})",
            name,
            external_port,
            internal_port
        );
        true
    }
}
