//! Input idle time for macOS using IOKit HIDIdleTime.

use core_foundation::base::TCFType;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use std::time::Duration;

use crate::error::ProbeError;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOServiceGetMatchingService(main_port: u32, matching: core_foundation::base::CFTypeRef) -> u32;
    fn IOServiceMatching(name: *const std::os::raw::c_char) -> core_foundation::base::CFTypeRef;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: core_foundation::string::CFStringRef,
        allocator: core_foundation::base::CFAllocatorRef,
        options: u32,
    ) -> core_foundation::base::CFTypeRef;
    fn IOObjectRelease(object: u32) -> i32;
}

fn unavailable(what: &str) -> ProbeError {
    ProbeError::Unavailable(format!("IOKit: {}", what))
}

pub(super) fn idle_time() -> Result<Duration, ProbeError> {
    let service_name = std::ffi::CString::new("IOHIDSystem").map_err(|_| unavailable("bad service name"))?;

    // SAFETY: every IOKit object created here is released before returning, and
    // the property is adopted by CFNumber under the create rule.
    unsafe {
        let matching = IOServiceMatching(service_name.as_ptr());
        if matching.is_null() {
            return Err(unavailable("IOHIDSystem matching failed"));
        }

        let service = IOServiceGetMatchingService(0, matching);
        if service == 0 {
            return Err(unavailable("IOHIDSystem service not found"));
        }

        let key = CFString::new("HIDIdleTime");
        let property = IORegistryEntryCreateCFProperty(service, key.as_concrete_TypeRef(), std::ptr::null(), 0);
        IOObjectRelease(service);

        if property.is_null() {
            return Err(unavailable("HIDIdleTime property missing"));
        }

        // Nanoseconds since the last HID event.
        let cf_number: CFNumber = CFNumber::wrap_under_create_rule(property as *mut _);
        let nanoseconds = cf_number
            .to_i64()
            .ok_or_else(|| unavailable("HIDIdleTime is not an integer"))?;

        Ok(Duration::from_nanos(nanoseconds.max(0) as u64))
    }
}
