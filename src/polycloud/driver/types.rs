use serde::{Deserialize, Serialize};

/// Identity pair returned by the driver for every CSP-backed object.
/// `name_id` is the driver-local name, `system_id` the CSP-native identifier.
/// Both must be preserved verbatim.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IId {
    #[serde(rename = "NameId", default)]
    pub name_id: String,
    #[serde(rename = "SystemId", default)]
    pub system_id: String,
}

/// Opaque driver-supplied metadata entry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyValue {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// Envelope every driver request travels in: the connection naming the
/// `(cloud, region, credentials)` triple plus the operation payload.
#[derive(Clone, Debug, Serialize)]
pub struct ReqWrapper<T: Serialize> {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: T,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VpcReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList")]
    pub subnet_info_list: Vec<SubnetReqInfo>,
    #[serde(rename = "CSPId", skip_serializing_if = "String::is_empty")]
    pub csp_id: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SubnetReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "Zone", skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(rename = "KeyValueList")]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VpcInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList", default)]
    pub subnet_info_list: Vec<SubnetInfo>,
    #[serde(rename = "TagList", default)]
    pub tag_list: Vec<KeyValue>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubnetInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Zone", default)]
    pub zone: String,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
    #[serde(rename = "TagList", default)]
    pub tag_list: Vec<KeyValue>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SecurityRuleInfo {
    #[serde(rename = "FromPort", default)]
    pub from_port: String,
    #[serde(rename = "ToPort", default)]
    pub to_port: String,
    #[serde(rename = "IPProtocol", default)]
    pub ip_protocol: String,
    #[serde(rename = "Direction", default)]
    pub direction: String,
    #[serde(rename = "CIDR", default)]
    pub cidr: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SecurityGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SecurityRules")]
    pub security_rules: Vec<SecurityRuleInfo>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SecurityGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: IId,
    #[serde(rename = "SecurityRules", default)]
    pub security_rules: Vec<SecurityRuleInfo>,
    #[serde(rename = "TagList", default)]
    pub tag_list: Vec<KeyValue>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct KeyPairReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyPairInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Fingerprint", default)]
    pub fingerprint: String,
    #[serde(rename = "PublicKey", default)]
    pub public_key: String,
    #[serde(rename = "PrivateKey", default)]
    pub private_key: String,
    #[serde(rename = "VMUserID", default)]
    pub vm_user_id: String,
    #[serde(rename = "TagList", default)]
    pub tag_list: Vec<KeyValue>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "GuestOS", default)]
    pub guest_os: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VCpuInfo {
    #[serde(rename = "Count", default)]
    pub count: String,
    #[serde(rename = "Clock", default)]
    pub clock: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GpuInfo {
    #[serde(rename = "Count", default)]
    pub count: String,
    #[serde(rename = "Mfr", default)]
    pub mfr: String,
    #[serde(rename = "Model", default)]
    pub model: String,
    #[serde(rename = "Mem", default)]
    pub mem: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VmSpecInfo {
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "VCpu", default)]
    pub v_cpu: VCpuInfo,
    #[serde(rename = "Mem", default)]
    pub mem: String,
    #[serde(rename = "Gpu", default)]
    pub gpu: Vec<GpuInfo>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VmReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName")]
    pub image_name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SubnetName")]
    pub subnet_name: String,
    #[serde(rename = "SecurityGroupNames")]
    pub security_group_names: Vec<String>,
    #[serde(rename = "KeyPairName")]
    pub key_pair_name: String,
    #[serde(rename = "VMSpecName")]
    pub vm_spec_name: String,
    #[serde(rename = "DataDiskNames", skip_serializing_if = "Vec::is_empty")]
    pub data_disk_names: Vec<String>,
    #[serde(rename = "RootDiskType", skip_serializing_if = "String::is_empty")]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", skip_serializing_if = "String::is_empty")]
    pub root_disk_size: String,
    #[serde(rename = "VMUserId", skip_serializing_if = "String::is_empty")]
    pub vm_user_id: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RegionInfo {
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "Zone", default)]
    pub zone: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VmInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Region", default)]
    pub region: RegionInfo,
    #[serde(rename = "ImageIId", default)]
    pub image_iid: IId,
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: IId,
    #[serde(rename = "SubnetIID", default)]
    pub subnet_iid: IId,
    #[serde(rename = "SecurityGroupIIds", default)]
    pub security_group_iids: Vec<IId>,
    #[serde(rename = "KeyPairIId", default)]
    pub key_pair_iid: IId,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "PublicIP", default)]
    pub public_ip: String,
    #[serde(rename = "PrivateIP", default)]
    pub private_ip: String,
    #[serde(rename = "SSHAccessPoint", default)]
    pub ssh_access_point: String,
    #[serde(rename = "VMUserId", default)]
    pub vm_user_id: String,
    #[serde(rename = "RootDiskType", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", default)]
    pub root_disk_size: String,
    #[serde(rename = "DataDiskIIds", default)]
    pub data_disk_iids: Vec<IId>,
    #[serde(rename = "VMStatus", default)]
    pub vm_status: String,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VmStatusInfo {
    #[serde(rename = "Status", default)]
    pub status: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DiskType")]
    pub disk_type: String,
    #[serde(rename = "DiskSize")]
    pub disk_size: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskAttachReqInfo {
    #[serde(rename = "VMName")]
    pub vm_name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "DiskType", default)]
    pub disk_type: String,
    #[serde(rename = "DiskSize", default)]
    pub disk_size: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "OwnerVM", default)]
    pub owner_vm: IId,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClusterNetworkReqInfo {
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SubnetNames")]
    pub subnet_names: Vec<String>,
    #[serde(rename = "SecurityGroupNames")]
    pub security_group_names: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct NodeGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName")]
    pub image_name: String,
    #[serde(rename = "VMSpecName")]
    pub vm_spec_name: String,
    #[serde(rename = "RootDiskType", skip_serializing_if = "String::is_empty")]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", skip_serializing_if = "String::is_empty")]
    pub root_disk_size: String,
    #[serde(rename = "KeyPairName")]
    pub key_pair_name: String,
    #[serde(rename = "OnAutoScaling")]
    pub on_auto_scaling: bool,
    #[serde(rename = "DesiredNodeSize")]
    pub desired_node_size: i32,
    #[serde(rename = "MinNodeSize")]
    pub min_node_size: i32,
    #[serde(rename = "MaxNodeSize")]
    pub max_node_size: i32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClusterReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Network")]
    pub network: ClusterNetworkReqInfo,
    #[serde(rename = "NodeGroupList")]
    pub node_group_list: Vec<NodeGroupReqInfo>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterNetworkInfo {
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: IId,
    #[serde(rename = "SubnetIIDs", default)]
    pub subnet_iids: Vec<IId>,
    #[serde(rename = "SecurityGroupIIDs", default)]
    pub security_group_iids: Vec<IId>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "ImageIID", default)]
    pub image_iid: IId,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "RootDiskType", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", default)]
    pub root_disk_size: String,
    #[serde(rename = "KeyPairIID", default)]
    pub key_pair_iid: IId,
    #[serde(rename = "OnAutoScaling", default)]
    pub on_auto_scaling: bool,
    #[serde(rename = "DesiredNodeSize", default)]
    pub desired_node_size: i32,
    #[serde(rename = "MinNodeSize", default)]
    pub min_node_size: i32,
    #[serde(rename = "MaxNodeSize", default)]
    pub max_node_size: i32,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Nodes", default)]
    pub nodes: Vec<IId>,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterAccessInfo {
    #[serde(rename = "Endpoint", default)]
    pub endpoint: String,
    #[serde(rename = "Kubeconfig", default)]
    pub kubeconfig: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterAddonsInfo {
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "IId", default)]
    pub iid: IId,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Network", default)]
    pub network: ClusterNetworkInfo,
    #[serde(rename = "NodeGroupList", default)]
    pub node_group_list: Vec<NodeGroupInfo>,
    #[serde(rename = "AccessInfo", default)]
    pub access_info: ClusterAccessInfo,
    #[serde(rename = "Addons", default)]
    pub addons: ClusterAddonsInfo,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "CreatedTime", default)]
    pub created_time: String,
    #[serde(rename = "KeyValueList", default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AutoscaleSizeReqInfo {
    #[serde(rename = "DesiredNodeSize")]
    pub desired_node_size: i32,
    #[serde(rename = "MinNodeSize")]
    pub min_node_size: i32,
    #[serde(rename = "MaxNodeSize")]
    pub max_node_size: i32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UpgradeClusterReqInfo {
    #[serde(rename = "Version")]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_wrapper_serializes_driver_field_names() {
        let wrapper = ReqWrapper {
            connection_name: "aws-tokyo-1".to_string(),
            req_info: VpcReqInfo {
                name: "u-abc123".to_string(),
                ipv4_cidr: "10.0.0.0/16".to_string(),
                subnet_info_list: vec![SubnetReqInfo {
                    name: "sn-1".to_string(),
                    ipv4_cidr: "10.0.0.0/24".to_string(),
                    zone: String::new(),
                    key_value_list: Vec::new(),
                }],
                csp_id: String::new(),
            },
        };

        let encoded = serde_json::to_value(&wrapper).expect("serialize wrapper");
        assert_eq!(encoded["ConnectionName"], "aws-tokyo-1");
        assert_eq!(encoded["ReqInfo"]["Name"], "u-abc123");
        assert_eq!(encoded["ReqInfo"]["IPv4_CIDR"], "10.0.0.0/16");
        assert_eq!(
            encoded["ReqInfo"]["SubnetInfoList"][0]["IPv4_CIDR"],
            "10.0.0.0/24"
        );
        assert!(encoded["ReqInfo"].get("CSPId").is_none());
    }

    #[test]
    fn iid_round_trips_both_identifiers() {
        let raw = r#"{"IId": {"NameId": "u-abc", "SystemId": "vpc-0123"}, "IPv4_CIDR": "10.0.0.0/16"}"#;
        let info: VpcInfo = serde_json::from_str(raw).expect("decode vpc info");
        assert_eq!(info.iid.name_id, "u-abc");
        assert_eq!(info.iid.system_id, "vpc-0123");
    }
}
