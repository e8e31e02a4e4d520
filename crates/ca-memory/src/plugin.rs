//! The host-facing surface of the engine.
//!
//! A host (usually an identity server) drives a server CA through the
//! [`ServerCa`] trait. Requests and responses are plain serializable
//! structs, all certificates and CSRs are DER-encoded.
use serde::{Deserialize, Serialize};

use crate::engine::{CaEngine, Error};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigureRequest {
    /// The JSON configuration payload, see [`CaConfig`](crate::config::CaConfig).
    pub configuration: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigureResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GetPluginInfoRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GetPluginInfoResponse {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenerateCsrRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenerateCsrResponse {
    pub csr: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoadCertificateRequest {
    pub signed_intermediate_cert: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoadCertificateResponse {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchCertificateRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchCertificateResponse {
    /// Empty if no certificate has been loaded yet.
    pub stored_intermediate_cert: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignCsrRequest {
    pub csr: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignCsrResponse {
    pub signed_cert: Vec<u8>,
}

/// The operations a host invokes on a server CA.
pub trait ServerCa {
    type Error: std::error::Error + 'static;

    fn configure(&self, request: ConfigureRequest) -> Result<ConfigureResponse, Self::Error>;

    fn get_plugin_info(
        &self,
        request: GetPluginInfoRequest,
    ) -> Result<GetPluginInfoResponse, Self::Error>;

    fn generate_csr(
        &self,
        request: GenerateCsrRequest,
    ) -> Result<GenerateCsrResponse, Self::Error>;

    fn load_certificate(
        &self,
        request: LoadCertificateRequest,
    ) -> Result<LoadCertificateResponse, Self::Error>;

    fn fetch_certificate(
        &self,
        request: FetchCertificateRequest,
    ) -> Result<FetchCertificateResponse, Self::Error>;

    fn sign_csr(&self, request: SignCsrRequest) -> Result<SignCsrResponse, Self::Error>;
}

impl ServerCa for CaEngine {
    type Error = Error;

    fn configure(&self, request: ConfigureRequest) -> Result<ConfigureResponse, Error> {
        self.configure_from_json(&request.configuration)?;
        Ok(ConfigureResponse {})
    }

    fn get_plugin_info(&self, _: GetPluginInfoRequest) -> Result<GetPluginInfoResponse, Error> {
        let info = self.plugin_info();
        Ok(GetPluginInfoResponse {
            name: info.name.to_owned(),
            version: info.version.to_owned(),
        })
    }

    fn generate_csr(&self, _: GenerateCsrRequest) -> Result<GenerateCsrResponse, Error> {
        let csr = CaEngine::generate_csr(self)?;
        Ok(GenerateCsrResponse { csr })
    }

    fn load_certificate(
        &self,
        request: LoadCertificateRequest,
    ) -> Result<LoadCertificateResponse, Error> {
        CaEngine::load_certificate(self, &request.signed_intermediate_cert)?;
        Ok(LoadCertificateResponse {})
    }

    fn fetch_certificate(
        &self,
        _: FetchCertificateRequest,
    ) -> Result<FetchCertificateResponse, Error> {
        Ok(FetchCertificateResponse {
            stored_intermediate_cert: CaEngine::fetch_certificate(self),
        })
    }

    fn sign_csr(&self, request: SignCsrRequest) -> Result<SignCsrResponse, Error> {
        let signed_cert = CaEngine::sign_csr(self, &request.csr)?;
        Ok(SignCsrResponse { signed_cert })
    }
}
