//! Maps `Box<dyn Error>` from trait boundaries to typed `LinkError`.
//!
//! The traits in `velo_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated
//! path for `velo_hardware::HwError` downcasting.

use crate::error::LinkError;

#[cfg(feature = "hardware-errors")]
fn downcast_hw(e: &(dyn std::error::Error + 'static)) -> Option<LinkError> {
    use velo_hardware::error::HwError;
    let hw = e.downcast_ref::<HwError>()?;
    Some(match hw {
        HwError::Timeout | HwError::AcceptTimeout(_) => LinkError::Timeout,
        HwError::Closed | HwError::Io(_) => LinkError::Transport(hw.to_string()),
        HwError::Address(_) => LinkError::Config(hw.to_string()),
        HwError::Device(_) => LinkError::Hardware(hw.to_string()),
    })
}

#[cfg(not(feature = "hardware-errors"))]
fn downcast_hw(_e: &(dyn std::error::Error + 'static)) -> Option<LinkError> {
    None
}

fn looks_like_timeout(s: &str) -> bool {
    let s = s.to_lowercase();
    s.contains("timeout") || s.contains("timed out")
}

/// Map a motor/encoder error. Unknown errors become `Hardware`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> LinkError {
    if let Some(mapped) = downcast_hw(e) {
        return mapped;
    }
    let s = e.to_string();
    if looks_like_timeout(&s) {
        LinkError::Timeout
    } else {
        LinkError::Hardware(s)
    }
}

/// Map a transport error. Unknown errors become `Transport`.
pub fn map_link_error(e: &(dyn std::error::Error + 'static)) -> LinkError {
    if let Some(mapped) = downcast_hw(e) {
        return mapped;
    }
    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && matches!(
            io.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    {
        return LinkError::Timeout;
    }
    let s = e.to_string();
    if looks_like_timeout(&s) {
        LinkError::Timeout
    } else {
        LinkError::Transport(s)
    }
}
