//! Single-broker consumer: fetch requests and offset lookups

use tracing::{debug, warn};

use crate::config::{ConnectionConfig, CrcPolicy, Timeouts};
use crate::error::KafkaClientError;
use crate::message::{MessageSet, ResponseBody};
use crate::metrics::{global_metrics, Timer};
use crate::protocol::{read_offsets, FetchRequest, OffsetRequest, Request, ResponseHeader};
use crate::transport::Transport;

pub use crate::protocol::{OFFSET_EARLIEST, OFFSET_LATEST};

/// Message set reading a response on a transport borrowed from the consumer
pub type BorrowedMessageSet<'a> = MessageSet<ResponseBody<&'a mut Transport>>;

/// Message set owning the transport it reads from
pub type OwnedMessageSet = MessageSet<ResponseBody<Transport>>;

/// Consumer bound to one broker connection
///
/// The transport is opened on first use and reopened after any failure.
#[derive(Debug)]
pub struct SimpleConsumer {
    config: ConnectionConfig,
    crc_policy: CrcPolicy,
    transport: Option<Transport>,
    last_response_size: u32,
}

impl SimpleConsumer {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            crc_policy: CrcPolicy::default(),
            transport: None,
            last_response_size: 0,
        }
    }

    /// Consumer with the shorter receive deadline used for fetching
    pub fn with_consumer_timeouts<S: Into<String>>(host: S, port: i32) -> Self {
        Self::new(ConnectionConfig::new(host, port).with_timeouts(Timeouts::consumer_default()))
    }

    /// Use an already-built transport, e.g. one wrapping an in-memory stream
    pub fn with_transport(config: ConnectionConfig, transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new(config)
        }
    }

    pub fn with_crc_policy(mut self, crc_policy: CrcPolicy) -> Self {
        self.crc_policy = crc_policy;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Size field of the last response header read
    pub fn last_response_size(&self) -> u32 {
        self.last_response_size
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_connected)
    }

    pub fn connect(&mut self) -> Result<(), KafkaClientError> {
        self.transport()?;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }

    fn transport(&mut self) -> Result<&mut Transport, KafkaClientError> {
        let transport = self
            .transport
            .get_or_insert_with(|| Transport::new(self.config.clone()));
        transport.connect()?;
        Ok(transport)
    }

    /// Fetch a message set that borrows this consumer's transport
    ///
    /// Returns `None` when the broker has nothing at the requested offset.
    pub fn fetch(
        &mut self,
        request: &FetchRequest,
    ) -> Result<Option<BorrowedMessageSet<'_>>, KafkaClientError> {
        let crc_policy = self.crc_policy;
        let transport = self.transport()?;
        let header = match fetch_header(transport, request) {
            Ok(header) => header,
            Err(e) => {
                self.last_response_size = 0;
                return Err(e);
            }
        };
        self.last_response_size = header.size;
        if header.is_empty() {
            return Ok(None);
        }

        let transport = self.transport()?;
        let body = ResponseBody::new(transport, header.body_len());
        let mut set = MessageSet::new(body, request.offset).with_crc_policy(crc_policy);
        set.rewind()?;
        Ok(Some(set))
    }

    /// Fetch a message set that takes the transport along with it
    ///
    /// Hand the set back through [`reclaim`](Self::reclaim) to reuse the
    /// connection; otherwise the next request opens a fresh one.
    pub fn fetch_owned(
        &mut self,
        request: &FetchRequest,
    ) -> Result<Option<OwnedMessageSet>, KafkaClientError> {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => Transport::new(self.config.clone()),
        };

        let header = match transport
            .connect()
            .and_then(|()| fetch_header(&mut transport, request))
        {
            Ok(header) => header,
            Err(e) => {
                self.last_response_size = 0;
                self.transport = Some(transport);
                return Err(e);
            }
        };
        self.last_response_size = header.size;
        if header.is_empty() {
            self.transport = Some(transport);
            return Ok(None);
        }

        let body = ResponseBody::new(transport, header.body_len());
        let mut set = MessageSet::new(body, request.offset).with_crc_policy(self.crc_policy);
        set.rewind()?;
        Ok(Some(set))
    }

    /// Take back the transport of a set returned by [`fetch_owned`](Self::fetch_owned)
    pub fn reclaim(&mut self, set: OwnedMessageSet) {
        let body = set.into_source();
        let unread = body.remaining();
        let mut transport = body.into_inner();
        if unread > 0 {
            // abandoned mid-response; the stream is no longer on a frame boundary
            debug!("Closing transport with {} unread response bytes", unread);
            transport.close();
        }
        self.transport = Some(transport);
    }

    /// Offsets before `time`, newest first; `time` may be
    /// [`OFFSET_LATEST`] or [`OFFSET_EARLIEST`]
    pub fn offsets_before(
        &mut self,
        topic: &str,
        partition: u32,
        time: i64,
        max_offsets: u32,
    ) -> Result<Vec<i64>, KafkaClientError> {
        let request = Request::from(OffsetRequest::new(topic, partition, time, max_offsets));
        let transport = self.transport()?;

        match request.write_to(transport) {
            Ok(_) => {}
            Err(e) if e.is_end_of_stream() || matches!(e, KafkaClientError::BrokenPipe { .. }) => {
                warn!("Reconnecting to resend offset request: {}", e);
                transport.connect()?;
                request.write_to(transport)?;
            }
            Err(e) => return Err(e),
        }

        let header = read_checked_header(transport)?;
        self.last_response_size = header.size;
        let transport = self.transport()?;
        read_offsets(transport, &header)
    }
}

/// Send a fetch and read its response header, recording fetch metrics
fn fetch_header(
    transport: &mut Transport,
    request: &FetchRequest,
) -> Result<ResponseHeader, KafkaClientError> {
    let metrics = global_metrics();
    let timer = Timer::start();
    debug!("Fetching {}", request);

    let result = Request::Fetch(request.clone())
        .write_to(transport)
        .and_then(|_| read_checked_header(transport));
    match result {
        Ok(header) => {
            metrics.record_fetch(header.is_empty(), timer.elapsed());
            Ok(header)
        }
        Err(e) => {
            metrics.record_fetch_error();
            Err(e)
        }
    }
}

/// Read a response header and map its error code, skipping the body of an
/// error response so the next frame starts cleanly
fn read_checked_header(transport: &mut Transport) -> Result<ResponseHeader, KafkaClientError> {
    let header = ResponseHeader::read_from(transport)?;
    if let Err(e) = header.check() {
        ResponseBody::new(&mut *transport, header.body_len()).drain()?;
        return Err(e);
    }
    Ok(header)
}
