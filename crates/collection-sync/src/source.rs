//! Where a synchronizer's snapshots come from.

use std::marker::PhantomData;

use async_trait::async_trait;
use remote_gateway::{EqFilter, Record, RemoteGateway, RemoteResult};
use serde_json::Value;

/// One full read of a collection.
#[async_trait]
pub trait SnapshotSource<R: Record>: Send + Sync {
    async fn fetch(&self) -> RemoteResult<Vec<R>>;
}

/// Table read with an optional equality filter, in the record's order.
pub struct TableSource<R> {
    gateway: RemoteGateway,
    filter: Option<EqFilter>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> TableSource<R> {
    pub fn new(gateway: RemoteGateway, filter: Option<EqFilter>) -> Self {
        Self {
            gateway,
            filter,
            _record: PhantomData,
        }
    }

    pub fn filter(&self) -> Option<&EqFilter> {
        self.filter.as_ref()
    }
}

#[async_trait]
impl<R: Record> SnapshotSource<R> for TableSource<R> {
    async fn fetch(&self) -> RemoteResult<Vec<R>> {
        self.gateway.fetch_collection::<R>(self.filter.clone()).await
    }
}

/// Set-returning procedure read (e.g. the workspace roster).
pub struct ProcedureSource<R> {
    gateway: RemoteGateway,
    name: String,
    args: Value,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> ProcedureSource<R> {
    pub fn new(gateway: RemoteGateway, name: impl Into<String>, args: Value) -> Self {
        Self {
            gateway,
            name: name.into(),
            args,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Record> SnapshotSource<R> for ProcedureSource<R> {
    async fn fetch(&self) -> RemoteResult<Vec<R>> {
        self.gateway
            .call_procedure::<R>(&self.name, self.args.clone())
            .await
    }
}
