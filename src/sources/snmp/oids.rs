//! The OIDs this strategy reads. Scalar OIDs include the `.0` instance.

pub const SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
pub const SYS_OBJECT_ID: &str = ".1.3.6.1.2.1.1.2.0";
pub const SYS_UPTIME: &str = ".1.3.6.1.2.1.1.3.0";
pub const SYS_CONTACT: &str = ".1.3.6.1.2.1.1.4.0";
pub const SYS_NAME: &str = ".1.3.6.1.2.1.1.5.0";
pub const SYS_LOCATION: &str = ".1.3.6.1.2.1.1.6.0";

/// ifEntry; walked whole, rows regrouped by interface index.
pub const IF_TABLE_ENTRY: &str = ".1.3.6.1.2.1.2.2.1";
pub const IF_DESCR_COL: u32 = 2;
pub const IF_TYPE_COL: u32 = 3;
pub const IF_SPEED_COL: u32 = 5;
pub const IF_PHYS_ADDRESS_COL: u32 = 6;
pub const IF_ADMIN_STATUS_COL: u32 = 7;
pub const IF_OPER_STATUS_COL: u32 = 8;

/// lldpRemEntry (LLDP-MIB); indexed by timeMark.localPort.remIndex.
pub const LLDP_REM_ENTRY: &str = ".1.0.8802.1.1.2.1.4.1.1";
pub const LLDP_REM_CHASSIS_ID_COL: u32 = 5;
pub const LLDP_REM_PORT_ID_COL: u32 = 7;
pub const LLDP_REM_SYS_NAME_COL: u32 = 9;

/// ipNetToMediaEntry; indexed by ifIndex.ipAddress.
pub const IP_NET_TO_MEDIA_ENTRY: &str = ".1.3.6.1.2.1.4.22.1";
pub const IP_NET_TO_MEDIA_PHYS_COL: u32 = 2;
pub const IP_NET_TO_MEDIA_TYPE_COL: u32 = 4;

/// ipNetToMediaType values.
pub const MEDIA_TYPE_DYNAMIC: u64 = 3;
pub const MEDIA_TYPE_STATIC: u64 = 4;
