//! Input idle time for Windows using the GetLastInputInfo Win32 API.

use std::time::Duration;
use windows::Win32::System::SystemInformation::GetTickCount;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

use crate::error::ProbeError;

pub(super) fn idle_time() -> Result<Duration, ProbeError> {
    let mut last_input = LASTINPUTINFO {
        cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
        dwTime: 0,
    };

    // SAFETY: last_input is a properly sized, initialized LASTINPUTINFO.
    let ok = unsafe { GetLastInputInfo(&mut last_input).as_bool() };
    if !ok {
        return Err(ProbeError::Unavailable("GetLastInputInfo failed".to_string()));
    }

    // Tick counts wrap after ~49 days.
    let current_tick = unsafe { GetTickCount() };
    let idle_ms = current_tick.wrapping_sub(last_input.dwTime);
    Ok(Duration::from_millis(idle_ms as u64))
}
