use anyhow::{bail, Context, Result};
use hwscope_core::{ClassGuid, ClassIcon, DeviceBackend, DeviceRecord, DeviceStatus, HostInfo};
use hwscope_safety::PrivilegeChecker;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

mod hotplug;

pub use hotplug::{classify_event, HotplugWatcher, DEFAULT_DEVNODE_DIR};

const USB_DEVICES_DIR: &str = "bus/usb/devices";
const PCI_RESCAN: &str = "bus/pci/rescan";

struct UsbClass {
    code: Option<u8>,
    name: &'static str,
    guid: ClassGuid,
    icon: &'static str,
}

const USB_CLASSES: &[UsbClass] = &[
    UsbClass {
        code: Some(0x01),
        name: "Sound, video and game controllers",
        guid: ClassGuid::from_u128(0x4d36e96c_e325_11ce_bfc1_08002be10318),
        icon: "audio-card",
    },
    UsbClass {
        code: Some(0x02),
        name: "Ports (COM & LPT)",
        guid: ClassGuid::from_u128(0x4d36e978_e325_11ce_bfc1_08002be10318),
        icon: "modem",
    },
    UsbClass {
        code: Some(0x03),
        name: "Human Interface Devices",
        guid: ClassGuid::from_u128(0x745a17a0_74d3_11d0_b6fe_00a0c90f57da),
        icon: "input-keyboard",
    },
    UsbClass {
        code: Some(0x06),
        name: "Imaging devices",
        guid: ClassGuid::from_u128(0x6bdd1fc6_810f_11d0_bec7_08002be2092f),
        icon: "camera-photo",
    },
    UsbClass {
        code: Some(0x07),
        name: "Printers",
        guid: ClassGuid::from_u128(0x4d36e979_e325_11ce_bfc1_08002be10318),
        icon: "printer",
    },
    UsbClass {
        code: Some(0x08),
        name: "Disk drives",
        guid: ClassGuid::from_u128(0x4d36e967_e325_11ce_bfc1_08002be10318),
        icon: "drive-removable-media",
    },
    UsbClass {
        code: Some(0x09),
        name: "Universal Serial Bus controllers",
        guid: ClassGuid::from_u128(0x36fc9e60_c465_11cf_8056_444553540000),
        icon: "drive-removable-media-usb",
    },
    UsbClass {
        code: Some(0x0b),
        name: "Smart card readers",
        guid: ClassGuid::from_u128(0x50dd5230_ba8a_11d1_bf5d_0000f805f530),
        icon: "auth-smartcard",
    },
    UsbClass {
        code: Some(0x0e),
        name: "Cameras",
        guid: ClassGuid::from_u128(0xca3e7ab9_b4c3_4ae6_8251_579ef933890f),
        icon: "camera-web",
    },
    UsbClass {
        code: Some(0xe0),
        name: "Bluetooth",
        guid: ClassGuid::from_u128(0xe0cbf06c_cd8b_4647_bb8a_263b43f0f974),
        icon: "bluetooth",
    },
    UsbClass {
        code: None,
        name: "Universal Serial Bus devices",
        guid: ClassGuid::from_u128(0x88bae032_5a81_49f0_bc3d_a4ff138216d6),
        icon: "drive-removable-media-usb",
    },
];

fn usb_class(code: Option<u8>) -> &'static UsbClass {
    // CDC data interfaces sit with their communications function.
    let code = code.map(|c| if c == 0x0a { 0x02 } else { c });
    USB_CLASSES
        .iter()
        .find(|class| class.code.is_some() && class.code == code)
        .unwrap_or(&USB_CLASSES[USB_CLASSES.len() - 1])
}

/// Device backend over the USB view of sysfs.
///
/// Devices are the `/sys/bus/usb/devices` entries without a `:` in their
/// name; entries with a `:` are interfaces of the device named before it.
/// Enable and disable go through `authorized`, removal through `remove`.
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    root: PathBuf,
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self::with_root("/sys")
    }

    /// Use a different sysfs mount point, e.g. a fake tree in tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn devices_dir(&self) -> PathBuf {
        self.root.join(USB_DEVICES_DIR)
    }

    fn entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.devices_dir();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            entries.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
        entries.sort();
        Ok(entries)
    }

    fn device_dir(&self, device_id: &str) -> Result<PathBuf> {
        if device_id.is_empty()
            || device_id.contains('/')
            || device_id == "."
            || device_id == ".."
            || device_id.contains(':')
        {
            bail!("not a USB device id: {device_id:?}");
        }
        let dir = self.devices_dir().join(device_id);
        if !dir.is_dir() {
            bail!("device {device_id} is not present");
        }
        Ok(dir)
    }

    fn read_device(&self, name: &str, dir: &Path, interface_classes: &[(String, u8)]) -> DeviceRecord {
        let vendor_id = read_hex_u16(dir.join("idVendor"));
        let product_id = read_hex_u16(dir.join("idProduct"));
        // Class 0 means the class is declared per interface.
        let class_code = read_hex_u8(dir.join("bDeviceClass"))
            .filter(|code| *code != 0)
            .or_else(|| {
                interface_classes
                    .iter()
                    .find(|(parent, _)| parent == name)
                    .map(|(_, code)| *code)
            });
        let class = usb_class(class_code);

        let description = read_string(dir.join("product")).unwrap_or_else(|| match (vendor_id, product_id) {
            (Some(vendor), Some(product)) => format!("USB Device ({vendor:04x}:{product:04x})"),
            _ => "Unknown USB Device".to_string(),
        });
        let authorized = read_string(dir.join("authorized"));
        let removable = read_string(dir.join("removable"));
        let is_root_hub = name.starts_with("usb");

        let mut status = DeviceStatus::empty();
        if is_root_hub {
            status |= DeviceStatus::ROOT_ENUMERATED;
        }
        if dir.join("driver").exists() {
            status |= DeviceStatus::DRIVER_LOADED | DeviceStatus::STARTED;
        } else if authorized.as_deref() != Some("0") {
            status |= DeviceStatus::HAS_PROBLEM;
        }
        if authorized.is_some() {
            status |= DeviceStatus::DISABLEABLE;
        }
        let is_removable = !is_root_hub && removable.as_deref() != Some("fixed");
        if is_removable {
            status |= DeviceStatus::REMOVABLE;
        }

        DeviceRecord {
            device_id: name.to_string(),
            parent_device_id: parent_of(name),
            class_guid: class.guid,
            description,
            manufacturer: read_string(dir.join("manufacturer")).unwrap_or_default(),
            class_description: class.name.to_string(),
            device_path: dir.display().to_string(),
            vendor_id: vendor_id.unwrap_or(0),
            product_id: product_id.unwrap_or(0),
            revision: read_hex_u16(dir.join("bcdDevice")).unwrap_or(0),
            status,
            is_present: true,
            is_hidden: false,
            is_removable,
            is_interface: false,
        }
    }

    fn read_interface(&self, name: &str, dir: &Path) -> DeviceRecord {
        let parent = parent_of(name);
        let parent_dir = self.devices_dir().join(&parent);
        let class = usb_class(read_hex_u8(dir.join("bInterfaceClass")));
        let mut status = DeviceStatus::empty();
        if dir.join("driver").exists() {
            status |= DeviceStatus::DRIVER_LOADED | DeviceStatus::STARTED;
        }
        DeviceRecord {
            device_id: name.to_string(),
            parent_device_id: parent,
            class_guid: class.guid,
            description: read_string(dir.join("interface"))
                .unwrap_or_else(|| format!("{} interface", class.name)),
            manufacturer: read_string(parent_dir.join("manufacturer")).unwrap_or_default(),
            class_description: class.name.to_string(),
            device_path: dir.display().to_string(),
            vendor_id: read_hex_u16(parent_dir.join("idVendor")).unwrap_or(0),
            product_id: read_hex_u16(parent_dir.join("idProduct")).unwrap_or(0),
            revision: read_hex_u16(parent_dir.join("bcdDevice")).unwrap_or(0),
            status,
            is_present: true,
            is_hidden: false,
            is_removable: false,
            is_interface: true,
        }
    }

    fn write_attribute(&self, device_id: &str, attribute: &str, value: &str) -> Result<()> {
        let path = self.device_dir(device_id)?.join(attribute);
        if !path.exists() {
            bail!("device {device_id} has no {attribute} attribute");
        }
        fs::write(&path, value).with_context(|| format!("write {}", path.display()))
    }
}

impl DeviceBackend for SysfsBackend {
    fn devices(&self) -> Result<Vec<DeviceRecord>> {
        let entries = self.entries()?;
        let interface_classes: Vec<(String, u8)> = entries
            .iter()
            .filter(|(name, _)| name.contains(':'))
            .filter_map(|(name, path)| {
                read_hex_u8(path.join("bInterfaceClass")).map(|code| (parent_of(name), code))
            })
            .collect();
        let devices: Vec<DeviceRecord> = entries
            .iter()
            .filter(|(name, _)| !name.contains(':'))
            .map(|(name, path)| self.read_device(name, path, &interface_classes))
            .collect();
        debug!(count = devices.len(), "enumerated usb devices");
        Ok(devices)
    }

    fn interfaces(&self) -> Result<Vec<DeviceRecord>> {
        let interfaces: Vec<DeviceRecord> = self
            .entries()?
            .iter()
            .filter(|(name, _)| name.contains(':'))
            .map(|(name, path)| self.read_interface(name, path))
            .collect();
        debug!(count = interfaces.len(), "enumerated usb interfaces");
        Ok(interfaces)
    }

    fn class_icon(&self, class_guid: ClassGuid) -> Option<ClassIcon> {
        USB_CLASSES
            .iter()
            .find(|class| class.guid == class_guid)
            .map(|class| ClassIcon {
                class_guid,
                name: class.icon.to_string(),
            })
    }

    fn is_device_disabled(&self, device_id: &str) -> Option<bool> {
        let dir = self.device_dir(device_id).ok()?;
        match read_string(dir.join("authorized"))?.as_str() {
            "0" => Some(true),
            "1" => Some(false),
            _ => None,
        }
    }

    fn set_device_state(&self, device_id: &str, enabled: bool) -> Result<()> {
        self.write_attribute(device_id, "authorized", if enabled { "1" } else { "0" })?;
        info!(%device_id, enabled, "device authorization changed");
        Ok(())
    }

    fn remove_device(&self, device_id: &str) -> Result<()> {
        self.write_attribute(device_id, "remove", "1")?;
        info!(%device_id, "device logically removed");
        Ok(())
    }

    fn scan_for_hardware_changes(&self) -> Result<()> {
        let path = self.root.join(PCI_RESCAN);
        fs::write(&path, "1").with_context(|| format!("write {}", path.display()))?;
        info!("pci rescan requested");
        Ok(())
    }
}

/// Parent of a sysfs USB name: `1-1.2` hangs off `1-1`, `1-1` off the root
/// hub `usb1`, and `1-1:1.0` is an interface of `1-1`.
fn parent_of(name: &str) -> String {
    if let Some((device, _)) = name.split_once(':') {
        return match device.strip_suffix("-0") {
            Some(bus) => format!("usb{bus}"),
            None => device.to_string(),
        };
    }
    if name.starts_with("usb") {
        return String::new();
    }
    match name.rsplit_once('.') {
        Some((parent, _)) => parent.to_string(),
        None => match name.split_once('-') {
            Some((bus, _)) => format!("usb{bus}"),
            None => String::new(),
        },
    }
}

/// Root check through the effective uid.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectiveUidChecker;

impl PrivilegeChecker for EffectiveUidChecker {
    #[cfg(unix)]
    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    fn is_elevated(&self) -> bool {
        false
    }
}

pub fn read_host_info() -> HostInfo {
    HostInfo {
        os: "linux".to_string(),
        os_version: read_os_release(),
        machine: read_machine(),
        host_name: host_name(),
    }
}

pub fn host_name() -> String {
    read_string("/proc/sys/kernel/hostname").unwrap_or_else(|| "localhost".to_string())
}

fn read_os_release() -> String {
    let data = fs::read_to_string("/etc/os-release").unwrap_or_default();
    let mut name = None;
    let mut version = None;
    for line in data.lines() {
        if line.starts_with("NAME=") && name.is_none() {
            name = Some(trim_os_value(line));
        } else if line.starts_with("VERSION=") && version.is_none() {
            version = Some(trim_os_value(line));
        }
    }
    match (name, version) {
        (Some(name), Some(version)) => format!("{} {}", name, version),
        (Some(name), None) => name,
        _ => "unknown".to_string(),
    }
}

fn trim_os_value(line: &str) -> String {
    let value = line.split_once('=').map(|(_, v)| v).unwrap_or("").trim();
    value.trim_matches('"').to_string()
}

fn read_machine() -> String {
    let vendor = read_string("/sys/devices/virtual/dmi/id/sys_vendor");
    let product = read_string("/sys/devices/virtual/dmi/id/product_name");
    match (vendor, product) {
        (Some(vendor), Some(product)) => format!("{} {}", vendor, product),
        (Some(vendor), None) => vendor,
        (None, Some(product)) => product,
        _ => "unknown".to_string(),
    }
}

fn read_string(path: impl AsRef<Path>) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_hex_u16(path: impl AsRef<Path>) -> Option<u16> {
    read_string(path).and_then(|value| u16::from_str_radix(&value, 16).ok())
}

fn read_hex_u8(path: impl AsRef<Path>) -> Option<u8> {
    read_string(path).and_then(|value| u8::from_str_radix(&value, 16).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node(root: &Path, name: &str, attrs: &[(&str, &str)], driver: bool) {
        let dir = root.join(USB_DEVICES_DIR).join(name);
        fs::create_dir_all(&dir).unwrap();
        for (attr, value) in attrs {
            fs::write(dir.join(attr), format!("{value}\n")).unwrap();
        }
        if driver {
            fs::create_dir_all(dir.join("driver")).unwrap();
        }
    }

    fn fake_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        node(
            root,
            "usb1",
            &[
                ("idVendor", "1d6b"),
                ("idProduct", "0002"),
                ("bcdDevice", "0515"),
                ("product", "xHCI Host Controller"),
                ("manufacturer", "Linux xhci-hcd"),
                ("bDeviceClass", "09"),
                ("removable", "unknown"),
                ("authorized", "1"),
            ],
            true,
        );
        node(root, "1-0:1.0", &[("bInterfaceClass", "09")], true);
        node(
            root,
            "1-1",
            &[
                ("idVendor", "045e"),
                ("idProduct", "028e"),
                ("bcdDevice", "0114"),
                ("product", "Controller"),
                ("manufacturer", "Microsoft"),
                ("bDeviceClass", "ff"),
                ("removable", "removable"),
                ("authorized", "1"),
                ("remove", ""),
            ],
            true,
        );
        node(root, "1-1:1.0", &[("bInterfaceClass", "ff")], true);
        node(
            root,
            "1-1.2",
            &[
                ("idVendor", "046d"),
                ("idProduct", "c52b"),
                ("bDeviceClass", "00"),
                ("product", "USB Receiver"),
                ("removable", "removable"),
                ("authorized", "0"),
            ],
            false,
        );
        node(
            root,
            "1-1.2:1.0",
            &[("bInterfaceClass", "03"), ("interface", "Keyboard")],
            false,
        );
        node(
            root,
            "1-3",
            &[("bDeviceClass", "00"), ("removable", "removable"), ("authorized", "1")],
            false,
        );
        tmp
    }

    #[test]
    fn maps_devices_with_parents_and_ids() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        let devices = backend.devices().unwrap();
        let ids: Vec<(&str, &str)> = devices
            .iter()
            .map(|d| (d.device_id.as_str(), d.parent_device_id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![("1-1", "usb1"), ("1-1.2", "1-1"), ("1-3", "usb1"), ("usb1", "")]
        );

        let pad = &devices[0];
        assert_eq!((pad.vendor_id, pad.product_id, pad.revision), (0x045e, 0x028e, 0x0114));
        assert_eq!(pad.hardware_ids().vendor_id, "0x045E");
        assert_eq!(pad.manufacturer, "Microsoft");
        assert!(pad.is_removable && !pad.has_problem());

        let receiver = &devices[1];
        assert_eq!(receiver.class_description, "Human Interface Devices");
        assert!(!receiver.has_problem());

        let broken = &devices[2];
        assert_eq!(broken.description, "Unknown USB Device");
        assert!(broken.has_problem());

        let hub = &devices[3];
        assert!(hub.is_root() && !hub.is_removable);
        assert!(hub.status.contains(DeviceStatus::ROOT_ENUMERATED));
        assert_eq!(hub.class_description, "Universal Serial Bus controllers");
    }

    #[test]
    fn interfaces_hang_off_their_device() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        let interfaces = backend.interfaces().unwrap();
        let ids: Vec<(&str, &str)> = interfaces
            .iter()
            .map(|d| (d.device_id.as_str(), d.parent_device_id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![("1-0:1.0", "usb1"), ("1-1.2:1.0", "1-1.2"), ("1-1:1.0", "1-1")]
        );
        let keyboard = &interfaces[1];
        assert!(keyboard.is_interface);
        assert_eq!(keyboard.description, "Keyboard");
        assert_eq!(keyboard.vendor_id, 0x046d);
    }

    #[test]
    fn authorized_drives_disabled_state() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        assert_eq!(backend.is_device_disabled("1-1"), Some(false));
        assert_eq!(backend.is_device_disabled("1-1.2"), Some(true));
        assert_eq!(backend.is_device_disabled("9-9"), None);
        assert_eq!(backend.is_device_disabled("1-1:1.0"), None);

        backend.set_device_state("1-1.2", true).unwrap();
        assert_eq!(backend.is_device_disabled("1-1.2"), Some(false));
    }

    #[test]
    fn remove_writes_attribute_when_supported() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        backend.remove_device("1-1").unwrap();
        let written = fs::read_to_string(tmp.path().join(USB_DEVICES_DIR).join("1-1/remove")).unwrap();
        assert_eq!(written, "1");
        assert!(backend.remove_device("1-3").is_err());
    }

    #[test]
    fn rejects_ids_outside_the_usb_tree() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        assert!(backend.set_device_state("../usb1", false).is_err());
        assert!(backend.set_device_state("..", false).is_err());
        assert!(backend.remove_device("").is_err());
    }

    #[test]
    fn scan_needs_rescan_attribute() {
        let tmp = fake_sysfs();
        let backend = SysfsBackend::with_root(tmp.path());
        assert!(backend.scan_for_hardware_changes().is_err());
        fs::create_dir_all(tmp.path().join("bus/pci")).unwrap();
        fs::write(tmp.path().join(PCI_RESCAN), "").unwrap();
        backend.scan_for_hardware_changes().unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join(PCI_RESCAN)).unwrap(), "1");
    }

    #[test]
    fn icons_only_for_known_classes() {
        let backend = SysfsBackend::with_root("/nonexistent");
        let hid = usb_class(Some(0x03)).guid;
        assert_eq!(backend.class_icon(hid).unwrap().name, "input-keyboard");
        assert!(backend.class_icon(ClassGuid::default()).is_none());
    }

    #[test]
    fn missing_tree_is_an_error() {
        let backend = SysfsBackend::with_root("/nonexistent");
        assert!(backend.devices().is_err());
    }

    #[test]
    fn parent_derivation() {
        assert_eq!(parent_of("usb2"), "");
        assert_eq!(parent_of("2-4"), "usb2");
        assert_eq!(parent_of("2-4.1.3"), "2-4.1");
        assert_eq!(parent_of("2-4.1:1.2"), "2-4.1");
        assert_eq!(parent_of("2-0:1.0"), "usb2");
    }

    #[test]
    fn trims_quoted_os_values() {
        assert_eq!(trim_os_value("NAME=\"Fedora Linux\""), "Fedora Linux");
    }
}
