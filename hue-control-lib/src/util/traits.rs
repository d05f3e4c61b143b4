use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An error code reported by the bridge API.
///
/// The bridge answers `200 OK` to almost every request; failures are only visible as
/// `{"error": {...}}` entries in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResponseCode {
    pub code: u32,
    pub message: &'static str,
}

// Error codes from https://developers.meethue.com/develop/hue-api/error-messages/.

pub const UNAUTHORIZED_USER: ResponseCode = ResponseCode {
    code: 1,
    message: "Unauthorized user",
};
pub const INVALID_JSON: ResponseCode = ResponseCode {
    code: 2,
    message: "Body contains invalid JSON",
};
pub const RESOURCE_NOT_AVAILABLE: ResponseCode = ResponseCode {
    code: 3,
    message: "Resource not available",
};
pub const METHOD_NOT_AVAILABLE: ResponseCode = ResponseCode {
    code: 4,
    message: "Method not available for resource",
};
pub const MISSING_PARAMETERS: ResponseCode = ResponseCode {
    code: 5,
    message: "Missing parameters in body",
};
pub const PARAMETER_NOT_AVAILABLE: ResponseCode = ResponseCode {
    code: 6,
    message: "Parameter not available",
};
pub const INVALID_VALUE: ResponseCode = ResponseCode {
    code: 7,
    message: "Invalid value for parameter",
};
pub const PARAMETER_NOT_MODIFIABLE: ResponseCode = ResponseCode {
    code: 8,
    message: "Parameter is not modifiable",
};
pub const TOO_MANY_ITEMS: ResponseCode = ResponseCode {
    code: 11,
    message: "Too many items in list",
};
pub const PORTAL_CONNECTION_REQUIRED: ResponseCode = ResponseCode {
    code: 12,
    message: "Portal connection required",
};
/// The link button has to be pressed before a user can be created.
pub const LINK_BUTTON_NOT_PRESSED: ResponseCode = ResponseCode {
    code: 101,
    message: "Link button not pressed",
};
/// State changes are rejected while the light is off.
pub const DEVICE_OFF: ResponseCode = ResponseCode {
    code: 201,
    message: "Parameter is not modifiable, device is off",
};
pub const INTERNAL_ERROR: ResponseCode = ResponseCode {
    code: 901,
    message: "Internal error",
};
/// Anything the bridge reports that is not listed above.
pub const UNKNOWN_ERROR: ResponseCode = ResponseCode {
    code: 0,
    message: "Unknown error",
};

/// Trait for things carrying a bridge API response code.
pub trait ResponseCodeTrait {
    fn response_code(&self) -> ResponseCode;

    fn map_response_code(code: u32) -> ResponseCode {
        match code {
            1 => UNAUTHORIZED_USER,
            2 => INVALID_JSON,
            3 => RESOURCE_NOT_AVAILABLE,
            4 => METHOD_NOT_AVAILABLE,
            5 => MISSING_PARAMETERS,
            6 => PARAMETER_NOT_AVAILABLE,
            7 => INVALID_VALUE,
            8 => PARAMETER_NOT_MODIFIABLE,
            11 => TOO_MANY_ITEMS,
            12 => PORTAL_CONNECTION_REQUIRED,
            101 => LINK_BUTTON_NOT_PRESSED,
            201 => DEVICE_OFF,
            901 => INTERNAL_ERROR,
            _ => UNKNOWN_ERROR,
        }
    }
}

/// One `error` entry of a bridge API response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: u32,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

impl ResponseCodeTrait for ApiError {
    fn response_code(&self) -> ResponseCode {
        Self::map_response_code(self.error_type)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) at {}: {}",
            self.response_code().message,
            self.error_type,
            self.address,
            self.description
        )
    }
}

impl std::error::Error for ApiError {}

/// Collects the `error` entries of a response body.
///
/// The bridge reports errors as an array of `{"error": {...}}` objects, possibly
/// mixed with `{"success": {...}}` entries. Any other shape has no errors.
pub fn api_errors(body: &Value) -> Vec<ApiError> {
    body.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("error"))
                .filter_map(|error| serde_json::from_value(error.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Fails with the first error in `body`, if there is one.
pub fn check_api_errors(body: &Value) -> Result<(), ApiError> {
    match api_errors(body).into_iter().next() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
