//! Wallet operations and deal records.

use pow_core::rpc::{
    BalanceResponse, DealRecordsFilter, NewAddrRequest, NewAddrResponse, SendFilRequest,
    SignRequest, SignResponse, VerifyRequest, VerifyResponse,
};
use pow_core::{AddrInfo, RetrievalDealRecord, StorageDealRecord};
use reqwest::Method;

use crate::client::{Auth, PowClient};
use crate::error::ClientError;

impl PowClient {
    pub async fn balance(&self, addr: &str) -> Result<u64, ClientError> {
        let resp: BalanceResponse = self
            .get_json(&format!("v1/wallet/balance/{addr}"), Auth::User)
            .await?;
        Ok(resp.balance)
    }

    /// Addresses owned by the profile.
    pub async fn addrs(&self) -> Result<Vec<AddrInfo>, ClientError> {
        self.get_json("v1/wallet/addrs", Auth::User).await
    }

    pub async fn new_addr(
        &self,
        name: &str,
        addr_type: Option<String>,
        make_default: bool,
    ) -> Result<String, ClientError> {
        let req = NewAddrRequest {
            name: name.to_string(),
            addr_type,
            make_default,
        };
        let resp: NewAddrResponse = self
            .send_json(Method::POST, "v1/wallet/addrs", &req, Auth::User)
            .await?;
        Ok(resp.addr)
    }

    pub async fn send_fil(&self, from: &str, to: &str, amount: u64) -> Result<(), ClientError> {
        let req = SendFilRequest {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        };
        self.send_unit(Method::POST, "v1/wallet/send", &req, Auth::User)
            .await
    }

    /// Sign `message` with a profile address.
    pub async fn sign(&self, addr: &str, message: &[u8]) -> Result<Vec<u8>, ClientError> {
        let endpoint = "POST /v1/wallet/sign";
        let req = SignRequest {
            addr: addr.to_string(),
            message: hex::encode(message),
        };
        let resp: SignResponse = self
            .send_json(Method::POST, "v1/wallet/sign", &req, Auth::User)
            .await?;
        hex::decode(&resp.signature).map_err(|e| ClientError::Decode {
            endpoint: endpoint.into(),
            message: format!("signature is not hex: {e}"),
        })
    }

    pub async fn verify(
        &self,
        addr: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, ClientError> {
        let req = VerifyRequest {
            addr: addr.to_string(),
            message: hex::encode(message),
            signature: hex::encode(signature),
        };
        let resp: VerifyResponse = self
            .send_json(Method::POST, "v1/wallet/verify", &req, Auth::User)
            .await?;
        Ok(resp.valid)
    }

    // -- Deal records ---------------------------------------------------------

    pub async fn storage_deal_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> Result<Vec<StorageDealRecord>, ClientError> {
        self.send_json(Method::POST, "v1/deals/storage", filter, Auth::User)
            .await
    }

    pub async fn retrieval_deal_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> Result<Vec<RetrievalDealRecord>, ClientError> {
        self.send_json(Method::POST, "v1/deals/retrieval", filter, Auth::User)
            .await
    }
}
