//! Static catalog of standard resource class and trait names.
//!
//! A standard resource class's id is its position in
//! [`STANDARD_RESOURCE_CLASSES`]; new names are only ever appended.

use crate::types::{ResourceClassId, CUSTOM_NAMESPACE, MISC_SHARES_VIA_AGGREGATE};

pub const STANDARD_RESOURCE_CLASSES: &[&str] = &[
    "VCPU",
    "MEMORY_MB",
    "DISK_GB",
    "PCI_DEVICE",
    "SRIOV_NET_VF",
    "NUMA_SOCKET",
    "NUMA_CORE",
    "NUMA_THREAD",
    "NUMA_MEMORY_MB",
    "IPV4_ADDRESS",
    "VGPU",
    "VGPU_DISPLAY_HEAD",
    "NET_BW_EGR_KILOBIT_PER_SEC",
    "NET_BW_IGR_KILOBIT_PER_SEC",
    "PCPU",
    "MEM_ENCRYPTION_CONTEXT",
    "FPGA",
    "PGPU",
    "NET_PACKET_RATE_KILOPACKET_PER_SEC",
    "NET_PACKET_RATE_EGR_KILOPACKET_PER_SEC",
    "NET_PACKET_RATE_IGR_KILOPACKET_PER_SEC",
];

pub const STANDARD_TRAITS: &[&str] = &[
    MISC_SHARES_VIA_AGGREGATE,
    "COMPUTE_DEVICE_TAGGING",
    "COMPUTE_NET_ATTACH_INTERFACE",
    "COMPUTE_STATUS_DISABLED",
    "COMPUTE_TRUSTED_CERTS",
    "COMPUTE_VOLUME_EXTEND",
    "COMPUTE_VOLUME_MULTI_ATTACH",
    "HW_CPU_HYPERTHREADING",
    "HW_CPU_X86_AESNI",
    "HW_CPU_X86_AVX",
    "HW_CPU_X86_AVX2",
    "HW_CPU_X86_AVX512F",
    "HW_CPU_X86_SGX",
    "HW_CPU_X86_SSE",
    "HW_CPU_X86_SSE2",
    "HW_CPU_X86_SSE41",
    "HW_CPU_X86_SSE42",
    "HW_CPU_X86_SSSE3",
    "HW_CPU_X86_SVM",
    "HW_CPU_X86_VMX",
    "HW_GPU_API_VULKAN",
    "HW_NIC_ACCEL_SSL",
    "HW_NIC_OFFLOAD_GENEVE",
    "HW_NIC_OFFLOAD_VXLAN",
    "HW_NIC_SRIOV",
    "HW_NIC_SRIOV_MULTIQUEUE",
    "HW_NUMA_ROOT",
    "STORAGE_DISK_HDD",
    "STORAGE_DISK_SSD",
];

/// Id a standard resource class is stored under, if `name` is standard.
pub fn standard_resource_class_id(name: &str) -> Option<ResourceClassId> {
    STANDARD_RESOURCE_CLASSES
        .iter()
        .position(|candidate| *candidate == name)
        .map(|index| index as ResourceClassId)
}

pub fn is_standard_resource_class(name: &str) -> bool {
    standard_resource_class_id(name).is_some()
}

pub fn is_standard_trait(name: &str) -> bool {
    !name.starts_with(CUSTOM_NAMESPACE) && STANDARD_TRAITS.contains(&name)
}
