//! Method names used on rack/region connections.
//!
//! [`region`] lists the calls the rack issues against a region event-loop.
//! [`ClusterCall`] enumerates the calls a region may issue against the rack.

/// Calls answered by a region event-loop.
pub mod region {
    /// Returns `{"ident": <event-loop name>}`.
    pub const IDENTIFY: &str = "Identify";
    /// Takes `{"message": hex}`, returns `{"digest": hex, "salt": hex}`.
    pub const AUTHENTICATE: &str = "Authenticate";
    /// Registers the rack, returns `{"system_id": str, "version"?: str}`.
    pub const REGISTER_RACK_CONTROLLER: &str = "RegisterRackController";
    /// Asks the region to switch the connection to TLS.
    pub const START_TLS: &str = "StartTLS";

    /// Error type reported when the region refuses a registration.
    pub const CANNOT_REGISTER_RACK_CONTROLLER: &str = "CannotRegisterRackController";
}

/// Error type reported when no handler is installed for a call.
pub const UNHANDLED_COMMAND: &str = "UnhandledCommand";

/// Calls a region may issue against a rack controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterCall {
    Identify,
    Authenticate,
    ListBootImages,
    ImportBootImages,
    IsImportBootImagesRunning,
    DescribePowerTypes,
    PowerOn,
    PowerOff,
    PowerCycle,
    PowerQuery,
    PowerDriverCheck,
    ConfigureDhcpV4,
    ConfigureDhcpV6,
    ValidateDhcpV4Config,
    ValidateDhcpV6Config,
    GetTlsParameters,
    EvaluateTag,
    RefreshRackControllerInfo,
    AddChassis,
    DiscoverPod,
    ComposeMachine,
    DecomposeMachine,
    ScanNetworks,
    DisableAndShutoffRackd,
}

impl ClusterCall {
    pub const ALL: [ClusterCall; 24] = [
        ClusterCall::Identify,
        ClusterCall::Authenticate,
        ClusterCall::ListBootImages,
        ClusterCall::ImportBootImages,
        ClusterCall::IsImportBootImagesRunning,
        ClusterCall::DescribePowerTypes,
        ClusterCall::PowerOn,
        ClusterCall::PowerOff,
        ClusterCall::PowerCycle,
        ClusterCall::PowerQuery,
        ClusterCall::PowerDriverCheck,
        ClusterCall::ConfigureDhcpV4,
        ClusterCall::ConfigureDhcpV6,
        ClusterCall::ValidateDhcpV4Config,
        ClusterCall::ValidateDhcpV6Config,
        ClusterCall::GetTlsParameters,
        ClusterCall::EvaluateTag,
        ClusterCall::RefreshRackControllerInfo,
        ClusterCall::AddChassis,
        ClusterCall::DiscoverPod,
        ClusterCall::ComposeMachine,
        ClusterCall::DecomposeMachine,
        ClusterCall::ScanNetworks,
        ClusterCall::DisableAndShutoffRackd,
    ];

    /// The method name carried in [`Request::method`](crate::Request).
    pub fn method_name(self) -> &'static str {
        match self {
            ClusterCall::Identify => "Identify",
            ClusterCall::Authenticate => "Authenticate",
            ClusterCall::ListBootImages => "ListBootImages",
            ClusterCall::ImportBootImages => "ImportBootImages",
            ClusterCall::IsImportBootImagesRunning => "IsImportBootImagesRunning",
            ClusterCall::DescribePowerTypes => "DescribePowerTypes",
            ClusterCall::PowerOn => "PowerOn",
            ClusterCall::PowerOff => "PowerOff",
            ClusterCall::PowerCycle => "PowerCycle",
            ClusterCall::PowerQuery => "PowerQuery",
            ClusterCall::PowerDriverCheck => "PowerDriverCheck",
            ClusterCall::ConfigureDhcpV4 => "ConfigureDHCPv4",
            ClusterCall::ConfigureDhcpV6 => "ConfigureDHCPv6",
            ClusterCall::ValidateDhcpV4Config => "ValidateDHCPv4Config",
            ClusterCall::ValidateDhcpV6Config => "ValidateDHCPv6Config",
            ClusterCall::GetTlsParameters => "GetTLSParameters",
            ClusterCall::EvaluateTag => "EvaluateTag",
            ClusterCall::RefreshRackControllerInfo => "RefreshRackControllerInfo",
            ClusterCall::AddChassis => "AddChassis",
            ClusterCall::DiscoverPod => "DiscoverPod",
            ClusterCall::ComposeMachine => "ComposeMachine",
            ClusterCall::DecomposeMachine => "DecomposeMachine",
            ClusterCall::ScanNetworks => "ScanNetworks",
            ClusterCall::DisableAndShutoffRackd => "DisableAndShutoffRackd",
        }
    }

    /// Looks up the call for a method name; `None` for unknown methods.
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|call| call.method_name() == method)
    }
}

impl std::fmt::Display for ClusterCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}
